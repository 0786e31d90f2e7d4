//! JWT authentication
//!
//! HS256 bearer tokens carrying `{sub, role, exp}`. The middleware resolves
//! an `AuthUser` extension for downstream handlers; login-time token
//! issuance also drops the whole status cache so one user's cached view can
//! never leak into another session on the same client.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use huurly_shared::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Authenticated caller, inserted as a request extension by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    const TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: UserRole) -> Result<String, ApiError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id,
            role: role.as_str().to_string(),
            exp: now + Self::TOKEN_LIFETIME_SECS,
            iat: now,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign JWT");
            ApiError::Internal
        })
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let data = decode::<Claims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT verification failed");
            ApiError::Unauthorized
        })?;

        Ok(AuthUser {
            user_id: data.claims.sub,
            role: UserRole::from_str_lossy(&data.claims.role),
        })
    }
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
}

/// Middleware that requires a valid bearer token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        tracing::debug!(path = %request.uri().path(), "Missing bearer token");
        return ApiError::Unauthorized.into_response();
    };

    match state.jwt_manager.verify(token) {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Middleware for the internal endpoints: a static service token in
/// `X-Internal-Token`, no user identity.
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("X-Internal-Token")
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(token) if token == state.config.internal_api_token => next.run(request).await,
        _ => {
            tracing::warn!(
                path = %request.uri().path(),
                "Internal endpoint called without valid service token"
            );
            ApiError::Unauthorized.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_back_to_caller() {
        let manager = JwtManager::new("test-secret");
        let user_id = Uuid::new_v4();

        let token = manager.issue(user_id, UserRole::Tenant).unwrap();
        let auth = manager.verify(&token).unwrap();

        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.role, UserRole::Tenant);
        assert!(!auth.is_admin());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let other = JwtManager::new("other-secret");

        let token = other.issue(Uuid::new_v4(), UserRole::Admin).unwrap();
        assert!(manager.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        assert!(manager.verify("not.a.jwt").is_err());
    }

    #[test]
    fn admin_claim_round_trips() {
        let manager = JwtManager::new("test-secret");
        let token = manager.issue(Uuid::new_v4(), UserRole::Admin).unwrap();
        assert!(manager.verify(&token).unwrap().is_admin());
    }
}
