//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Caller is not authorized for this resource")]
    Unauthorized,

    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

impl BillingError {
    /// Whether the caller may retry the same request and expect it to
    /// eventually succeed. Store and provider hiccups are retryable;
    /// signature and authorization failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Database(_) | BillingError::StripeApi(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(BillingError::Database("connection reset".into()).is_retryable());
        assert!(BillingError::StripeApi("timeout".into()).is_retryable());
    }

    #[test]
    fn validation_and_auth_errors_are_not_retryable() {
        assert!(!BillingError::WebhookSignatureInvalid.is_retryable());
        assert!(!BillingError::Unauthorized.is_retryable());
        assert!(!BillingError::MissingConfig("STRIPE_SECRET_KEY").is_retryable());
    }
}
