//! Internal maintenance endpoints
//!
//! Service-token authenticated. Responses use a fixed envelope so operators
//! and cron monitors can parse success uniformly:
//! `{ "success": bool, "message": ..., "timestamp": ... }`.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn envelope(success: bool, message: Value) -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::new());

    let key = if success { "message" } else { "error" };
    Json(json!({
        "success": success,
        key: message,
        "timestamp": timestamp,
    }))
}

/// Run the reminder and expiration passes now. Safe to trigger alongside
/// the cron run; both passes claim rows before acting.
pub async fn run(State(state): State<AppState>) -> Json<Value> {
    let summary = state.billing.sweeper.run_maintenance().await;
    let success = summary.is_clean();
    envelope(success, json!(summary))
}

/// Reconcile checkouts stuck in pending against the provider.
pub async fn sync_pending(State(state): State<AppState>) -> Json<Value> {
    match state.billing.sync.sync_stuck_pending().await {
        Ok(report) => {
            let success = report.errors.is_empty();
            envelope(success, json!(report))
        }
        Err(e) => {
            tracing::error!(error = %e, "Pending sync failed");
            envelope(false, json!(e.to_string()))
        }
    }
}

/// Raw subscription row for a user, for support diagnosis.
pub async fn debug_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let row = state.billing.sync.debug_subscription(user_id).await?;
    match row {
        Some(debug) => Ok(Json(json!(debug))),
        None => Err(ApiError::NotFound),
    }
}
