//! API error types and response mapping
//!
//! Client-facing messages stay generic; the specific cause goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use huurly_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Webhook signature verification failed")]
    WebhookSignature,

    #[error("Unable to start payment")]
    CheckoutFailed,

    #[error("Internal server error")]
    Internal,
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::WebhookSignatureInvalid => ApiError::WebhookSignature,
            BillingError::Unauthorized => ApiError::Forbidden,
            BillingError::UserNotFound(_) | BillingError::SubscriptionNotFound(_) => {
                ApiError::NotFound
            }
            BillingError::StripeApi(ref msg) => {
                tracing::error!(error = msg, "Payment provider error");
                ApiError::CheckoutFailed
            }
            other => {
                tracing::error!(error = %other, "Billing operation failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::WebhookSignature => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::CheckoutFailed => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_errors_surface_as_generic_checkout_failure() {
        let api: ApiError = BillingError::StripeApi("card_declined: do not log to client".into())
            .into();
        // The provider detail must not reach the client.
        assert_eq!(api.to_string(), "Unable to start payment");
    }

    #[test]
    fn signature_errors_map_to_bad_request() {
        let api: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(api, ApiError::WebhookSignature));
    }

    #[test]
    fn unauthorized_billing_maps_to_forbidden() {
        let api: ApiError = BillingError::Unauthorized.into();
        assert!(matches!(api, ApiError::Forbidden));
    }
}
