//! Subscription record store access and status queries
//!
//! All writes to the `subscriptions` table live here, expressed as single
//! conditional statements (upserts against the `user_id` unique key, or
//! guarded UPDATEs) so that duplicate webhook deliveries and concurrent
//! workers re-apply the same target state instead of racing a
//! read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::error::BillingResult;
use crate::status::SubscriptionStatus;

/// The status view handed to the UI/authorization layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusView {
    pub has_active_subscription: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_id: Option<String>,
}

impl SubscriptionStatusView {
    pub fn inactive() -> Self {
        Self {
            has_active_subscription: false,
            subscription_type: None,
            expires_at: None,
            stripe_subscription_id: None,
        }
    }
}

/// Expiration details for the dashboard banner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationInfo {
    pub expires_at: Option<OffsetDateTime>,
    pub days_remaining: Option<i64>,
}

/// Outcome of a provider-driven conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was found and transitioned; carries the owning user.
    Applied(Uuid),
    /// The row was found but already in the target state.
    AlreadyCurrent(Uuid),
    /// No matching row. Out-of-order delivery; the caller logs and no-ops.
    NotFound,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    cache: Arc<StatusCache>,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, cache: Arc<StatusCache>) -> Self {
        Self { pool, cache }
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    // -------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------

    /// Cache-fronted status lookup. Two calls within the TTL issue exactly
    /// one store read.
    pub async fn check_status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatusView> {
        self.cache
            .get_or_load(user_id, || self.load_status(user_id))
            .await
    }

    /// Invalidate and re-read. Called when the client returns from the
    /// payment redirect.
    pub async fn refresh_status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatusView> {
        self.cache.invalidate(user_id).await;
        self.check_status(user_id).await
    }

    async fn load_status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatusView> {
        let row: Option<(String, Option<OffsetDateTime>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT status, current_period_end, stripe_subscription_id
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((status, period_end, stripe_subscription_id))
                if SubscriptionStatus::from_db_str(&status).grants_access() =>
            {
                Self::active_view(period_end, stripe_subscription_id)
            }
            _ => SubscriptionStatusView::inactive(),
        })
    }

    fn active_view(
        period_end: Option<OffsetDateTime>,
        stripe_subscription_id: Option<String>,
    ) -> SubscriptionStatusView {
        SubscriptionStatusView {
            has_active_subscription: true,
            // One plan per role today; tenants are on the yearly plan.
            subscription_type: Some("yearly".to_string()),
            expires_at: period_end,
            stripe_subscription_id,
        }
    }

    /// Batch status lookup for administrative views: one query with an IN
    /// filter instead of N single reads. Users without an active row are
    /// reported inactive.
    pub async fn batch_check_status(
        &self,
        user_ids: &[Uuid],
    ) -> BillingResult<HashMap<Uuid, SubscriptionStatusView>> {
        let rows: Vec<(Uuid, Option<OffsetDateTime>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT user_id, current_period_end, stripe_subscription_id
            FROM subscriptions
            WHERE user_id = ANY($1) AND status = 'active'
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut active: HashMap<Uuid, SubscriptionStatusView> = rows
            .into_iter()
            .map(|(user_id, period_end, sub_id)| (user_id, Self::active_view(period_end, sub_id)))
            .collect();

        Ok(user_ids
            .iter()
            .map(|id| {
                let view = active
                    .remove(id)
                    .unwrap_or_else(SubscriptionStatusView::inactive);
                (*id, view)
            })
            .collect())
    }

    /// Expiration details derived from the (cache-fronted) status view.
    pub async fn expiration_info(&self, user_id: Uuid) -> BillingResult<ExpirationInfo> {
        let view = self.check_status(user_id).await?;

        Ok(match view.expires_at {
            Some(expires_at) => ExpirationInfo {
                expires_at: Some(expires_at),
                days_remaining: Some(days_remaining(expires_at, OffsetDateTime::now_utc())),
            },
            None => ExpirationInfo {
                expires_at: None,
                days_remaining: None,
            },
        })
    }

    /// Whether the user's subscription ends within the reminder window.
    pub async fn is_expiring_soon(&self, user_id: Uuid, window_days: i64) -> BillingResult<bool> {
        let info = self.expiration_info(user_id).await?;
        Ok(info
            .days_remaining
            .map(|days| days <= window_days)
            .unwrap_or(false))
    }

    // -------------------------------------------------------------------
    // Write path (checkout + webhook reconciliation)
    // -------------------------------------------------------------------

    /// Record a freshly created checkout session against the user's
    /// subscription row in `pending` state. An existing `active` row is
    /// never clobbered; the completed-checkout upsert below handles
    /// renewals on its own.
    pub async fn record_pending_checkout(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, status, stripe_session_id)
            VALUES ($1, 'pending', $2)
            ON CONFLICT (user_id) DO UPDATE SET
                status = 'pending',
                stripe_session_id = EXCLUDED.stripe_session_id,
                stripe_subscription_id = NULL,
                current_period_start = NULL,
                current_period_end = NULL,
                reminder_sent = FALSE,
                updated_at = NOW()
            WHERE subscriptions.status <> 'active'
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate(user_id).await;
        Ok(())
    }

    /// Idempotent activation from a completed checkout.
    ///
    /// Upserts against the `user_id` unique key; the DO UPDATE is guarded
    /// so that re-applying the same event leaves the row untouched and
    /// returns `false`, which is how the caller knows not to re-notify.
    pub async fn activate_from_checkout(
        &self,
        user_id: Uuid,
        session_id: &str,
        subscription: &stripe::Subscription,
        amount_cents: Option<i64>,
        currency: Option<String>,
    ) -> BillingResult<bool> {
        let status = SubscriptionStatus::from_provider(subscription.status);
        let period_start = OffsetDateTime::from_unix_timestamp(subscription.current_period_start)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let period_end = OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let transitioned: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                user_id, status, stripe_subscription_id, stripe_session_id,
                current_period_start, current_period_end, amount_cents, currency,
                reminder_sent
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE)
            ON CONFLICT (user_id) DO UPDATE SET
                status = EXCLUDED.status,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_session_id = EXCLUDED.stripe_session_id,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                reminder_sent = FALSE,
                updated_at = NOW()
            WHERE subscriptions.status IS DISTINCT FROM EXCLUDED.status
               OR subscriptions.stripe_subscription_id
                      IS DISTINCT FROM EXCLUDED.stripe_subscription_id
               OR subscriptions.current_period_end
                      IS DISTINCT FROM EXCLUDED.current_period_end
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(subscription.id.as_str())
        .bind(session_id)
        .bind(period_start)
        .bind(period_end)
        .bind(amount_cents)
        .bind(currency.unwrap_or_else(|| "eur".to_string()))
        .fetch_optional(&self.pool)
        .await?;

        self.cache.invalidate(user_id).await;
        Ok(transitioned.is_some())
    }

    /// Apply a `customer.subscription.updated` event: refresh status and
    /// billing period, keyed by the provider subscription id.
    pub async fn apply_provider_update(
        &self,
        subscription: &stripe::Subscription,
    ) -> BillingResult<UpdateOutcome> {
        let status = SubscriptionStatus::from_provider(subscription.status);
        let period_start = OffsetDateTime::from_unix_timestamp(subscription.current_period_start)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let period_end = OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = $3,
                current_period_end = $4,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
              AND (status IS DISTINCT FROM $2
                   OR current_period_end IS DISTINCT FROM $4)
            RETURNING user_id
            "#,
        )
        .bind(subscription.id.as_str())
        .bind(status.as_str())
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve_outcome(updated, subscription.id.as_str())
            .await
    }

    /// Apply a `customer.subscription.deleted` event.
    pub async fn cancel_by_provider(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<UpdateOutcome> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                status = 'cancelled',
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
              AND status <> 'cancelled'
            RETURNING user_id
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve_outcome(updated, stripe_subscription_id).await
    }

    /// Mark a pending checkout as cancelled after the session expired or
    /// its async payment failed, keyed by the checkout session id.
    pub async fn cancel_pending_checkout(&self, session_id: &str) -> BillingResult<UpdateOutcome> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                status = 'cancelled',
                updated_at = NOW()
            WHERE stripe_session_id = $1
              AND status = 'pending'
            RETURNING user_id
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((user_id,)) => {
                self.cache.invalidate(user_id).await;
                Ok(UpdateOutcome::Applied(user_id))
            }
            None => {
                let existing: Option<(Uuid,)> = sqlx::query_as(
                    "SELECT user_id FROM subscriptions WHERE stripe_session_id = $1",
                )
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

                Ok(match existing {
                    Some((user_id,)) => UpdateOutcome::AlreadyCurrent(user_id),
                    None => UpdateOutcome::NotFound,
                })
            }
        }
    }

    /// Distinguish "row absent" (out-of-order delivery, no-op) from "row
    /// already in the target state" after a guarded UPDATE matched nothing.
    async fn resolve_outcome(
        &self,
        updated: Option<(Uuid,)>,
        stripe_subscription_id: &str,
    ) -> BillingResult<UpdateOutcome> {
        if let Some((user_id,)) = updated {
            self.cache.invalidate(user_id).await;
            return Ok(UpdateOutcome::Applied(user_id));
        }

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE stripe_subscription_id = $1")
                .bind(stripe_subscription_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match existing {
            Some((user_id,)) => UpdateOutcome::AlreadyCurrent(user_id),
            None => UpdateOutcome::NotFound,
        })
    }
}

/// Whole days until expiry, clamped at zero for already-passed dates.
fn days_remaining(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expires_at - now).whole_days().max(0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::Duration;

    #[test]
    fn days_remaining_counts_whole_days() {
        let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        assert_eq!(days_remaining(now + Duration::days(14), now), 14);
        // Partial days round down; 13 days 23 hours is still 13.
        assert_eq!(
            days_remaining(now + Duration::days(14) - Duration::hours(1), now),
            13
        );
    }

    #[test]
    fn days_remaining_clamps_past_dates_to_zero() {
        let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        assert_eq!(days_remaining(now - Duration::days(3), now), 0);
        assert_eq!(days_remaining(now, now), 0);
    }

    #[test]
    fn inactive_view_has_no_detail_fields() {
        let view = SubscriptionStatusView::inactive();
        assert!(!view.has_active_subscription);
        assert!(view.subscription_type.is_none());
        assert!(view.expires_at.is_none());
        assert!(view.stripe_subscription_id.is_none());
    }

    #[test]
    fn active_view_reports_yearly_plan() {
        let end = OffsetDateTime::now_utc() + time::Duration::days(180);
        let view = SubscriptionService::active_view(Some(end), Some("sub_456".to_string()));
        assert!(view.has_active_subscription);
        assert_eq!(view.subscription_type.as_deref(), Some("yearly"));
        assert_eq!(view.expires_at, Some(end));
        assert_eq!(view.stripe_subscription_id.as_deref(), Some("sub_456"));
    }

    #[test]
    fn status_view_serializes_camel_case() {
        let view = SubscriptionStatusView::inactive();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["hasActiveSubscription"], serde_json::json!(false));
        // Absent optionals are omitted entirely.
        assert!(json.get("subscriptionType").is_none());
    }

    #[test]
    fn update_outcome_equality() {
        let user = Uuid::new_v4();
        assert_eq!(UpdateOutcome::Applied(user), UpdateOutcome::Applied(user));
        assert_ne!(UpdateOutcome::Applied(user), UpdateOutcome::NotFound);
    }
}
