use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use msdss_data_api::{database::DatabaseManager, router, AppConfig, AppState};

/// Serve the data API over HTTP
#[derive(Debug, Parser)]
#[command(name = "msdss-data-api", version, about)]
struct Args {
    /// Address to bind, overrides the configured host
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the configured port
    #[arg(long)]
    port: Option<u16>,

    /// Environment file loaded before configuration is read
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("failed to load {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    tracing::info!("Starting data API in {:?} mode", config.environment);

    let store = DatabaseManager::connect(&config.database).await?;
    let state = AppState::new(store, &config).await?;
    let app = router(state, &config);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
