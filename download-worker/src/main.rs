//! Download Worker - Main entry point

use anyhow::Result;
use clap::Parser;
use download_worker::daemon::{context::spawn_idle_watchdog, ShutdownCoordinator, WorkerContext};
use download_worker::{api, config::Config, utils};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of the static site (overrides config)
    #[arg(long, value_name = "DIR")]
    site_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.site_root {
        config.site.root = root;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting download-worker v{} (origin: {})",
        env!("CARGO_PKG_VERSION"),
        config.own_origin()
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let idle_timeout = config.context.idle_timeout_secs;

    let shutdown = ShutdownCoordinator::new();
    let context = WorkerContext::new();

    let state = api::create_app_state(config, context.clone())?;
    tracing::info!("Serving site from {}", state.config.site.root.display());
    tracing::info!("Intercepting {}<name>", state.config.intercept.prefix);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    context.activate();

    if idle_timeout > 0 {
        spawn_idle_watchdog(
            context.clone(),
            Duration::from_secs(idle_timeout),
            shutdown.token(),
        );
    }

    let token = shutdown.token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    });

    shutdown.wait_for_signal().await;
    context.deactivate();

    // In-flight archives keep streaming until done; give them a bounded window
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
