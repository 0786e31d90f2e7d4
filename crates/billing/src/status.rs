//! Subscription status vocabulary
//!
//! All translation between Stripe's status strings and ours lives here, so
//! a new provider status shows up as a compile error (on the typed path) or
//! a logged conservative default (on the stored-string path) instead of a
//! silent grant of access.

use serde::{Deserialize, Serialize};
use stripe::SubscriptionStatus as StripeSubStatus;

/// Local subscription states.
///
/// `Pending` is the state between checkout-session creation and the first
/// confirmed webhook. `Active` is only ever reached via a verified provider
/// event. `Expired` is reached by a provider expiration signal or by the
/// expiration sweeper noticing the period end has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Decode a stored status string. Unknown values decode to `Pending`:
    /// the conservative default never grants paid-feature access.
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "pending" => SubscriptionStatus::Pending,
            "active" => SubscriptionStatus::Active,
            "paused" => SubscriptionStatus::Paused,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            other => {
                tracing::warn!(status = other, "Unknown stored subscription status");
                SubscriptionStatus::Pending
            }
        }
    }

    /// Map a provider subscription status into our vocabulary.
    ///
    /// Exhaustive on purpose: when async-stripe grows a new variant this
    /// fails to compile rather than defaulting silently.
    pub fn from_provider(status: StripeSubStatus) -> Self {
        match status {
            StripeSubStatus::Active | StripeSubStatus::Trialing => SubscriptionStatus::Active,
            StripeSubStatus::Canceled => SubscriptionStatus::Cancelled,
            StripeSubStatus::Incomplete => SubscriptionStatus::Pending,
            StripeSubStatus::IncompleteExpired => SubscriptionStatus::Expired,
            StripeSubStatus::PastDue | StripeSubStatus::Unpaid => SubscriptionStatus::Paused,
            StripeSubStatus::Paused => SubscriptionStatus::Paused,
        }
    }

    /// Only `Active` grants paid-feature access.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
