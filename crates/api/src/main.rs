// API server clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Huurly API Server
//!
//! HTTP surface for the subscription lifecycle: checkout, status queries,
//! the Stripe webhook endpoint, and internal maintenance triggers.

mod auth;
mod config;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use axum::http::{header, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huurly_billing::BillingService;
use huurly_shared::{create_pool, run_migrations};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,huurly_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huurly API server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    // Missing Stripe secrets abort startup here: the webhook endpoint must
    // never accept traffic without signature verification.
    let billing = Arc::new(BillingService::from_env(pool.clone())?);
    tracing::info!("Billing service initialized");

    // Periodic cache sweep bounds memory; reads already ignore stale
    // entries, this just reclaims them.
    let sweep_interval = billing.config().cache_sweep_interval;
    let cache = billing.status_cache.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // First tick fires immediately; nothing to sweep yet.
        loop {
            ticker.tick().await;
            let removed = cache.sweep_expired().await;
            if removed > 0 {
                tracing::debug!(removed = removed, "Swept expired status cache entries");
            }
        }
    });

    let state = AppState::new(pool, config.clone(), billing);

    let allowed_origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    let app = create_router(state).layer(cors).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
