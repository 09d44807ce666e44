//! The bundle server's HTTP surface.
//!
//! | Method | Path                        | Behavior                          |
//! |--------|-----------------------------|-----------------------------------|
//! | GET    | `/`                         | liveness, `200 "ok"`              |
//! | GET    | `/health`                   | alias of `/`                      |
//! | GET    | `/metrics`                  | Prometheus rendering              |
//! | GET    | `/v1/bundles/{name}`        | bundle bytes with etag validation |
//! | POST   | `/v1/bundles/{name}/rebuild`| trigger a rebuild                 |
//! | POST   | `/v1/webhooks/{name}`       | delegate to a webhook adapter     |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;
use tracing::info;

use bundle_server_core::service::Service;
use bundle_server_core::webhook::WebhookRequest;

pub mod error;

pub use error::ServerError;

// --- Application State
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub metrics_handle: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[allow(clippy::expect_used)] // metrics setup is infallible; panic acceptable during initialization
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Builds the application router around a running service.
pub fn app(service: Arc<Service>) -> Router {
    let state = AppState {
        service,
        metrics_handle: setup_metrics(),
    };

    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/bundles/{name}", get(get_bundle))
        .route("/v1/bundles/{name}/rebuild", post(rebuild_bundle))
        .route("/v1/webhooks/{name}", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn run(
    service: Arc<Service>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> error::Result<()> {
    let address = service.server_config().await.address;
    let address: SocketAddr = address
        .parse()
        .map_err(|_| ServerError::Address(address.clone()))?;

    let router = app(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(address = %address, "starting bundle server");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

async fn get_bundle(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(bundle) = state.service.bundle(&name).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (data, etag) = bundle.snapshot().await;

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());
    if let Some(candidate) = if_none_match
        && !etag.is_empty()
        && candidate == etag
    {
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::CONTENT_TYPE, "application/tar+gzip".to_string()),
                (header::ETAG, etag),
            ],
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/tar+gzip".to_string()),
            (header::ETAG, etag),
        ],
        data,
    )
        .into_response()
}

async fn rebuild_bundle(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.service.rebuild_bundle(&name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) if err.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest { headers, body };
    match state.service.handle_webhook(&name, &request).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) if err.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
