//! Subscription status endpoints

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use huurly_billing::{ExpirationInfo, SubscriptionStatusView};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Single-user status. A caller asking about a different user gets the
/// inactive view, not an error: the UI polls this after login and a stale
/// session id must degrade to "no subscription", never to a failure page.
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionStatusView>> {
    if user_id != auth.user_id && !auth.is_admin() {
        tracing::debug!(
            caller = %auth.user_id,
            subject = %user_id,
            "Status query for another user, returning inactive"
        );
        return Ok(Json(SubscriptionStatusView::inactive()));
    }

    let view = state.billing.subscriptions.check_status(user_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    pub user_ids: Vec<Uuid>,
}

const BATCH_LIMIT: usize = 500;

/// Batch status for admin views. One store query regardless of batch size.
pub async fn batch_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<BatchStatusRequest>,
) -> ApiResult<Json<HashMap<Uuid, SubscriptionStatusView>>> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    if request.user_ids.len() > BATCH_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "At most {BATCH_LIMIT} users per batch"
        )));
    }

    let statuses = state
        .billing
        .subscriptions
        .batch_check_status(&request.user_ids)
        .await?;
    Ok(Json(statuses))
}

/// Drop the caller's cached status and re-read. Called by the client when it
/// returns from the payment redirect, so the fresh state shows up without
/// waiting out the cache TTL.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionStatusView>> {
    let view = state
        .billing
        .subscriptions
        .refresh_status(auth.user_id)
        .await?;
    Ok(Json(view))
}

/// Expiration details for the caller's own subscription.
pub async fn expiration(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ExpirationInfo>> {
    let info = state
        .billing
        .subscriptions
        .expiration_info(auth.user_id)
        .await?;
    Ok(Json(info))
}
