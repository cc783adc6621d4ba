//! Linewire Service Server
//!
//! Runs one line-oriented TCP service on the shared engine with a small demo
//! command set. Real services link the library and supply their own router.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use linewire::config::{LogFormat, ServerConfig, ServiceKind};
use linewire::protocol::{CommandTable, Response};
use linewire::{AppState, Listener, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before reading LINEWIRE_* overrides
    dotenv::dotenv().ok();

    let config = ServerConfig::load().await?;

    init_logging(config.log_format);

    info!("Linewire {} service v{}", config.service, VERSION);
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let port = config.port();
    let router = demo_router(config.service);
    info!(commands = ?router.commands(), "Command table ready");

    let state = Arc::new(AppState::new(config, router)?);
    let listener = Listener::new(state);

    let addr = listener.start(port).await?;
    info!("Service ready on {}", addr);

    wait_for_shutdown().await;

    info!("Shutting down service...");
    listener.stop().await?;

    info!("Service shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,linewire=debug"));

    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .init(),
    }
}

/// Commands available in every demo service
fn demo_router(service: ServiceKind) -> CommandTable {
    CommandTable::new()
        .route("ECHO", |req| Response::success(req.args().join("|")))
        .route("TIME", |_| Response::success(chrono::Utc::now().to_rfc3339()))
        .route("SERVICE", move |_| Response::success(service.as_str()))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
