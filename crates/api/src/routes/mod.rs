//! HTTP route definitions

mod checkout;
mod maintenance;
mod session;
mod subscription;
mod webhooks;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::{require_auth, require_internal_token};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Webhook deliveries authenticate with their signature, not a bearer
    // token.
    let webhook_routes =
        Router::new().route("/api/webhooks/stripe", post(webhooks::stripe_webhook));

    let user_routes = Router::new()
        .route("/api/billing/checkout", post(checkout::create_checkout))
        .route(
            "/api/subscription/status/{user_id}",
            get(subscription::status),
        )
        .route(
            "/api/subscription/status/batch",
            post(subscription::batch_status),
        )
        .route("/api/subscription/refresh", post(subscription::refresh))
        .route(
            "/api/subscription/expiration",
            get(subscription::expiration),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let internal_routes = Router::new()
        .route("/api/internal/maintenance", post(maintenance::run))
        .route("/api/internal/sync-pending", post(maintenance::sync_pending))
        .route(
            "/api/internal/debug/subscription/{user_id}",
            get(maintenance::debug_subscription),
        )
        .route("/api/internal/session", post(session::issue))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(webhook_routes)
        .merge(user_routes)
        .merge(internal_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
