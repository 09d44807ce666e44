//! End-to-end scenarios driven through the HTTP router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use bundle_server_core::registry::Registry;
use bundle_server_http::app;
use e2e_tests::fixtures::{start_service, test_registry, wait_for, wait_for_initial_build};

async fn get_bundle(router: &axum::Router, name: &str, if_none_match: Option<&str>) -> (StatusCode, Option<String>, Vec<u8>) {
    let mut request = Request::builder().uri(format!("/v1/bundles/{name}"));
    if let Some(etag) = if_none_match {
        request = request.header(header::IF_NONE_MATCH, etag);
    }

    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let etag = response
        .headers()
        .get(header::ETAG)
        .map(|value| value.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, etag, body)
}

async fn post(router: &axum::Router, uri: &str) -> StatusCode {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

/// S1: a second GET carrying the etag comes back 304 with an empty body.
#[tokio::test]
async fn serves_304_when_etag_matches() {
    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("data.json"), r#"{"users": ["ann"]}"#).unwrap();

    let config = format!(
        r#"
stores:
  dir:
    type: directory
    config:
      directory: {}
bundles:
  b:
    store: dir
    polling:
      disable: true
"#,
        tree.path().display()
    );

    let (service, _file) = start_service(&config, Registry::with_defaults()).await;
    wait_for_initial_build(&service, "b").await;
    let router = app(Arc::clone(&service));

    let (status, etag, body) = get_bundle(&router, "b", None).await;
    assert_eq!(status, StatusCode::OK);
    let etag = etag.expect("etag header");
    assert!(!body.is_empty());

    let (status, _, body) = get_bundle(&router, "b", Some(&etag)).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());

    // a stale validator still gets the full body
    let (status, _, body) = get_bundle(&router, "b", Some("bogus")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.is_empty());

    service.shutdown().await;
}

/// S2: an upstream change flips the etag and produces exactly one publish
/// carrying the new etag.
#[tokio::test]
async fn etag_changes_on_upstream_change_and_publishes_once() {
    let (registry, instruments) = test_registry(None);
    let config = r#"
stores:
  main:
    type: swappable
    config:
      data: v1
publishers:
  p1:
    type: recording
bundles:
  b:
    store: main
    publishers: [p1]
    polling:
      disable: true
"#;

    let (service, _file) = start_service(config, registry).await;
    let etag1 = wait_for_initial_build(&service, "b").await;
    let router = app(Arc::clone(&service));

    instruments.store("main").set_data(b"v2".to_vec());
    assert_eq!(post(&router, "/v1/bundles/b/rebuild").await, StatusCode::OK);

    let (status, etag2, _) = get_bundle(&router, "b", None).await;
    assert_eq!(status, StatusCode::OK);
    let etag2 = etag2.expect("etag header");
    assert_ne!(etag1, etag2);

    let publisher = instruments.publisher("p1");
    let payload = publisher.wait_for_payload().await;
    let expected = serde_json::json!({ "etag": etag2 }).to_string();
    assert_eq!(payload, expected.as_bytes());
    assert_eq!(publisher.payloads().len(), 1);

    service.shutdown().await;
}

/// S6: a webhook only rebuilds the bundles that reference it.
#[tokio::test]
async fn webhook_routes_to_referencing_bundle_only() {
    let (registry, instruments) = test_registry(None);
    let config = r#"
stores:
  s1:
    type: swappable
    config:
      data: one
  s2:
    type: swappable
    config:
      data: two
webhooks:
  h1:
    type: basic
bundles:
  b1:
    store: s1
    webhooks: [h1]
    polling:
      disable: true
  b2:
    store: s2
    polling:
      disable: true
"#;

    let (service, _file) = start_service(config, registry).await;
    wait_for_initial_build(&service, "b1").await;
    wait_for_initial_build(&service, "b2").await;
    let router = app(Arc::clone(&service));

    let s1 = instruments.store("s1");
    let s2 = instruments.store("s2");
    assert_eq!(s1.calls(), 1);
    assert_eq!(s2.calls(), 1);

    assert_eq!(post(&router, "/v1/webhooks/h1").await, StatusCode::OK);

    wait_for(|| s1.calls() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(s2.calls(), 1);

    service.shutdown().await;
}

/// Webhook auth failures surface as 500 with the error text.
#[tokio::test]
async fn webhook_rejection_is_a_500_with_error_text() {
    let (registry, _) = test_registry(None);
    let config = r#"
stores:
  s1:
    type: swappable
webhooks:
  h1:
    type: basic
    config:
      secret: tell-no-one
bundles:
  b1:
    store: s1
    webhooks: [h1]
    polling:
      disable: true
"#;

    let (service, _file) = start_service(config, registry).await;
    let router = app(Arc::clone(&service));

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/webhooks/h1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("webhook rejected"));

    service.shutdown().await;
}
