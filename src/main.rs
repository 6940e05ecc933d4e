use axum::{routing::get, Router};
use defi_lending_aggregator::{
    blockchain::EthereumClient,
    config::Settings,
    handlers::{create_lending_routes, health_check},
    services::{CoinGeckoPriceOracle, LendingService},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_tracing(&settings.logging.level, settings.logging.json);
    info!(chain_id = settings.blockchain.chain_id, "Starting DeFi lending aggregator");

    let transport = Arc::new(
        EthereumClient::new(&settings.blockchain.rpc_url)
            .await?
            .with_max_retries(settings.blockchain.max_retries),
    );
    let prices = Arc::new(CoinGeckoPriceOracle::new(
        settings.prices.base_url.clone(),
        settings.prices.api_key.clone(),
        Duration::from_secs(settings.prices.timeout_seconds),
    ));

    let service = Arc::new(LendingService::new(
        settings.blockchain.chain_id,
        transport,
        prices,
        &settings,
    ));

    // Warm the market snapshot so the first request is served from cache
    let warmup = service.clone();
    tokio::spawn(async move {
        let markets = warmup.get_markets(true).await;
        info!(market_count = markets.len(), "Market snapshot warmed");
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_lending_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service });

    let addr: SocketAddr = format!("{}:{}", settings.api.host, settings.api.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server running on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Shutting down DeFi lending aggregator");
    Ok(())
}
