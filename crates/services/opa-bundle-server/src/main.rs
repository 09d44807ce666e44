//! `opa-bundle-server` CLI.
//!
//! ```text
//! opa-bundle-server server start --config config.yaml
//! ```
//!
//! Flags fall back to `OPA_BUNDLE_SERVER_*` environment variables. The
//! process exits 0 on a clean shutdown (SIGINT/SIGTERM) and 1 on a fatal
//! startup error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use bundle_server_common::{LogFormat, LogLevel, setup_tracing};
use bundle_server_core::registry::Registry;
use bundle_server_core::service::{Service, ServiceConfig};

#[derive(Parser)]
#[command(name = "opa-bundle-server")]
#[command(about = "Bundle server for Open Policy Agent deployments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Server commands
    Server(ServerArgs),
}

#[derive(Args)]
struct ServerArgs {
    #[command(subcommand)]
    command: ServerCommands,
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Start the server
    Start(StartArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Location of the config file
    #[arg(short, long, env = "OPA_BUNDLE_SERVER_CONFIG")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(
        short = 'l',
        long,
        env = "OPA_BUNDLE_SERVER_LOG_LEVEL",
        default_value_t = LogLevel::Info
    )]
    log_level: LogLevel,

    /// Log format (text, json, or json-pretty)
    #[arg(
        long,
        env = "OPA_BUNDLE_SERVER_LOG_FORMAT",
        default_value_t = LogFormat::Json
    )]
    log_format: LogFormat,

    /// Reload automatically when the config file changes
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Commands::Server(server) = cli.command;
    let ServerCommands::Start(args) = server.command;

    setup_tracing(args.log_level, args.log_format);

    if let Err(err) = start(args).await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    let service = Service::start(
        ServiceConfig {
            file: args.config.canonicalize().unwrap_or(args.config),
            watch: args.watch,
        },
        Registry::with_defaults(),
    )
    .await?;

    bundle_server_http::run(Arc::clone(&service), shutdown_signal()).await?;

    service.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt"),
        _ = terminate => info!("received terminate"),
    }
}
