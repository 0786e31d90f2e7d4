//! Stripe webhook endpoint
//!
//! Takes the raw request body: signature verification runs over the exact
//! bytes Stripe signed, so the payload must not pass through a JSON
//! extractor first.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::WebhookSignature)?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;

    // Errors after verification return 500 so Stripe redelivers; the event
    // claim keeps redelivery idempotent.
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
