//! Stripe client construction and billing configuration
//!
//! Every tunable the reconciliation logic depends on lives here with its
//! default, so operational thresholds are configuration rather than
//! constants scattered through the handlers.

use std::time::Duration;

use huurly_shared::UserRole;

use crate::error::{BillingError, BillingResult};

/// Billing configuration, loaded from the environment once at startup.
///
/// Missing Stripe secrets are a hard startup failure: the webhook endpoint
/// must never accept traffic without signature verification.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Price for the tenant yearly plan. Fixed per role; callers never
    /// supply a price, which rules out price tampering.
    pub tenant_price_id: String,
    /// Retries for the checkout-completion provider lookup, after the first
    /// try. Worst case added latency is the sum of the doubling delays,
    /// ~62s at the defaults; keep it under Stripe's delivery timeout.
    pub webhook_retry_attempts: u32,
    pub webhook_retry_initial_delay: Duration,
    /// Signed webhook timestamp tolerance.
    pub webhook_timestamp_tolerance: Duration,
    /// Status cache entry lifetime.
    pub cache_ttl: Duration,
    /// How often the background sweep drops stale cache entries.
    pub cache_sweep_interval: Duration,
    /// "Expiring soon" reminder window for the sweeper.
    pub reminder_window_days: i64,
    /// Age after which a still-pending checkout is considered stuck.
    pub stuck_pending_threshold: Duration,
    /// Base URL the hosted payment page redirects back to.
    pub frontend_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::MissingConfig("STRIPE_SECRET_KEY"))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::MissingConfig("STRIPE_WEBHOOK_SECRET"))?;
        let tenant_price_id = std::env::var("STRIPE_PRICE_ID_TENANT")
            .map_err(|_| BillingError::MissingConfig("STRIPE_PRICE_ID_TENANT"))?;

        Ok(Self {
            secret_key,
            webhook_secret,
            tenant_price_id,
            webhook_retry_attempts: env_u64("WEBHOOK_RETRY_ATTEMPTS", 5) as u32,
            webhook_retry_initial_delay: Duration::from_secs(env_u64(
                "WEBHOOK_RETRY_INITIAL_DELAY_SECS",
                2,
            )),
            webhook_timestamp_tolerance: Duration::from_secs(env_u64(
                "WEBHOOK_TIMESTAMP_TOLERANCE_SECS",
                300,
            )),
            cache_ttl: Duration::from_secs(env_u64("SUBSCRIPTION_CACHE_TTL_SECS", 300)),
            cache_sweep_interval: Duration::from_secs(env_u64(
                "SUBSCRIPTION_CACHE_SWEEP_SECS",
                600,
            )),
            reminder_window_days: env_u64("SUBSCRIPTION_REMINDER_WINDOW_DAYS", 14) as i64,
            stuck_pending_threshold: Duration::from_secs(env_u64(
                "STUCK_PENDING_THRESHOLD_SECS",
                300,
            )),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// The price for a role's subscription plan. Only tenants subscribe.
    pub fn price_id_for_role(&self, role: UserRole) -> Option<&str> {
        role.subscribes().then_some(self.tenant_price_id.as_str())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Thin wrapper pairing the Stripe SDK client with our config.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: "whsec_test".into(),
            tenant_price_id: "price_tenant_yearly".into(),
            webhook_retry_attempts: 5,
            webhook_retry_initial_delay: Duration::from_secs(2),
            webhook_timestamp_tolerance: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(600),
            reminder_window_days: 14,
            stuck_pending_threshold: Duration::from_secs(300),
            frontend_url: "http://localhost:3000".into(),
        }
    }

    #[test]
    fn numeric_overrides_fall_back_to_defaults_when_unset() {
        assert_eq!(env_u64("HUURLY_TEST_UNSET_TUNABLE", 42), 42);
    }

    #[test]
    fn only_tenant_role_has_a_price() {
        let config = test_config();
        assert_eq!(
            config.price_id_for_role(UserRole::Tenant),
            Some("price_tenant_yearly")
        );
        assert_eq!(config.price_id_for_role(UserRole::Landlord), None);
        assert_eq!(config.price_id_for_role(UserRole::Admin), None);
    }
}
