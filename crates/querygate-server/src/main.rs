//! Querygate HTTP Server
//!
//! Serves queries, batches and streams over the configured data sources.

use anyhow::Result;
use querygate_server::api;
use querygate_server::config::{LogFormat, ServerConfig};
use querygate_server::gateway;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Initialize tracing
    init_tracing(&config)?;
    info!(
        "Loaded configuration: {}:{}, cache backend {}, {} data sources",
        config.host,
        config.port,
        config.cache.backend.as_str(),
        config.datasources.len()
    );

    let shutdown = CancellationToken::new();
    let state = gateway::init_gateway(&config, shutdown.clone()).await?;
    let registry = state.registry.clone();

    let app = api::create_router(state);

    // Start server
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    info!("  Health check: http://{}/health", addr);
    info!("  Query API: POST http://{}/query", addr);
    info!("  Streaming API: POST http://{}/stream", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    shutdown.cancel();
    registry.close_all().await;

    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(config: &ServerConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "querygate_server={level},querygate_runtime={level},tower_http=debug",
            level = config.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
