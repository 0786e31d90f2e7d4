//! Session issuance
//!
//! Credentials live with the identity provider; the main application
//! exchanges its service token for a user-scoped JWT here after it has
//! authenticated the user. Issuing a session drops the whole status cache,
//! so a view cached for the previous account on the same client can never
//! carry over.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huurly_shared::UserRole;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSessionRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSessionResponse {
    pub token: String,
}

pub async fn issue(
    State(state): State<AppState>,
    Json(request): Json<IssueSessionRequest>,
) -> ApiResult<Json<IssueSessionResponse>> {
    let role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
        .bind(request.user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "User lookup failed during session issuance");
            ApiError::Internal
        })?;

    let Some((role,)) = role else {
        return Err(ApiError::NotFound);
    };

    let token = state
        .jwt_manager
        .issue(request.user_id, UserRole::from_str_lossy(&role))?;

    state.billing.status_cache.invalidate_all().await;
    tracing::info!(user_id = %request.user_id, "Session issued, status cache cleared");

    Ok(Json(IssueSessionResponse { token }))
}
