// Entry point for the CSV export server

use anyhow::{Context, Result};
use rakuten_hotels_csv::{build_app, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rakuten_hotels_csv=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    if config.credentials.is_none() {
        tracing::warn!("RAKUTEN_APP_ID is not set; exports are disabled until it is configured");
    }
    tracing::info!(
        rate_limit_floor_ms = config.rate_limit_floor.as_millis() as u64,
        timeout_secs = config.timeout_secs,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).context("Failed to build Rakuten API client")?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on http://{}", config.bind_addr);
    tracing::info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
