//! Checkout endpoint

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use huurly_billing::{CheckoutResponse, RedirectUrls};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Optional; when present it must match the caller. Admins may start a
    /// checkout on another user's behalf.
    pub user_id: Option<Uuid>,
    /// Optional redirect overrides; off-origin values are replaced with the
    /// configured defaults.
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let subject = request.user_id.unwrap_or(auth.user_id);

    // Unlike the status path, a mismatch here is a hard error: starting a
    // payment for someone else must never silently succeed.
    if subject != auth.user_id && !auth.is_admin() {
        tracing::warn!(
            caller = %auth.user_id,
            subject = %subject,
            "Checkout attempted for another user"
        );
        return Err(ApiError::Forbidden);
    }

    let redirects = RedirectUrls {
        success_url: request.success_url,
        cancel_url: request.cancel_url,
    };
    let response = state
        .billing
        .checkout
        .create_session(subject, redirects)
        .await?;
    Ok(Json(response))
}
