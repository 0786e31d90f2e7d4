// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Huurly Billing Module
//!
//! Stripe integration for the tenant subscription lifecycle.
//!
//! ## Features
//!
//! - **Checkout**: Create hosted checkout sessions (card and iDEAL)
//! - **Webhooks**: Verified, exactly-once reconciliation of provider events
//! - **Status**: Cache-fronted subscription status queries, single and batch
//! - **Maintenance**: Expiry reminders and overdue expiration sweeps
//! - **Sync**: Repair of checkouts stuck in `pending` after lost webhooks
//! - **Notifications**: In-app messages for payment and expiry events

pub mod cache;
pub mod checkout;
pub mod client;
pub mod error;
pub mod notifications;
pub mod status;
pub mod subscriptions;
pub mod sweeper;
pub mod sync;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Cache
pub use cache::StatusCache;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService, RedirectUrls};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Notifications
pub use notifications::NotificationService;

// Status
pub use status::SubscriptionStatus;

// Subscriptions
pub use subscriptions::{
    ExpirationInfo, SubscriptionService, SubscriptionStatusView, UpdateOutcome,
};

// Sweeper
pub use sweeper::{MaintenanceSummary, SweeperService};

// Sync
pub use sync::{PendingSyncReport, SubscriptionDebug, SyncService};

// Webhooks
pub use webhooks::WebhookHandler;

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub subscriptions: SubscriptionService,
    pub sweeper: SweeperService,
    pub sync: SyncService,
    pub notifications: NotificationService,
    pub webhooks: WebhookHandler,
    pub status_cache: Arc<StatusCache>,
    config: StripeConfig,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let stripe = StripeClient::new(config.clone());
        let status_cache = Arc::new(StatusCache::new(config.cache_ttl));

        let subscriptions = SubscriptionService::new(pool.clone(), status_cache.clone());
        let notifications = NotificationService::new(pool.clone());

        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone(), subscriptions.clone()),
            sweeper: SweeperService::new(
                pool.clone(),
                notifications.clone(),
                status_cache.clone(),
                config.reminder_window_days,
            ),
            sync: SyncService::new(stripe.clone(), pool.clone(), subscriptions.clone()),
            webhooks: WebhookHandler::new(
                stripe,
                pool,
                subscriptions.clone(),
                notifications.clone(),
            ),
            subscriptions,
            notifications,
            status_cache,
            config,
        }
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
