use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use tripsink::config::Config;
use tripsink::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    info!("starting trip ingestion service");

    let config = Config::from_env()?;
    let port = config.http_port;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let state = Arc::new(AppState::new(config, shutdown_tx));
    let routes = server::routes(state);

    info!("server starting on port {}", port);
    info!("health check: http://localhost:{}/health", port);
    info!("upload endpoint: POST http://localhost:{}/upload-csv", port);
    info!(
        "aggregate endpoint: GET http://localhost:{}/weekly-average-trips",
        port
    );

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let (_addr, serving) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_rx.recv().await;
    });
    serving.await;

    info!("server stopped");
    Ok(())
}
