//! Stuck-checkout reconciliation
//!
//! Webhooks can be lost. This module scans subscriptions that have sat in
//! `pending` past a threshold, asks the provider what actually happened to
//! their checkout session, and repairs the row: activate when the session
//! was paid, cancel when it expired, leave alone when payment is genuinely
//! still in flight (iDEAL settles asynchronously).

use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionPaymentStatus, CheckoutSessionStatus,
    Subscription, SubscriptionId,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

/// Outcome of one stuck-pending scan.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncReport {
    pub scanned: usize,
    pub activated: usize,
    pub cancelled: usize,
    pub still_pending: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Raw row dump for support tooling.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDebug {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub stripe_subscription_id: Option<String>,
    pub stripe_session_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub reminder_sent: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct SyncService {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
}

impl SyncService {
    pub fn new(stripe: StripeClient, pool: PgPool, subscriptions: SubscriptionService) -> Self {
        Self {
            stripe,
            pool,
            subscriptions,
        }
    }

    /// Scan and repair stuck pending checkouts. Per-row failures are
    /// captured in the report so one broken session does not abort the scan.
    pub async fn sync_stuck_pending(&self) -> BillingResult<PendingSyncReport> {
        let threshold_secs = self.stripe.config().stuck_pending_threshold.as_secs() as i64;

        let stuck: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT user_id, stripe_session_id
            FROM subscriptions
            WHERE status = 'pending'
              AND stripe_session_id IS NOT NULL
              AND updated_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(threshold_secs)
        .fetch_all(&self.pool)
        .await?;

        let mut report = PendingSyncReport {
            scanned: stuck.len(),
            ..Default::default()
        };

        for (user_id, session_id) in stuck {
            match self.reconcile_session(user_id, &session_id).await {
                Ok(SessionOutcome::Activated) => report.activated += 1,
                Ok(SessionOutcome::Cancelled) => report.cancelled += 1,
                Ok(SessionOutcome::StillPending) => report.still_pending += 1,
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        session_id = session_id,
                        error = %e,
                        "Stuck checkout reconciliation failed"
                    );
                    report.errors.push(format!("{session_id}: {e}"));
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            activated = report.activated,
            cancelled = report.cancelled,
            still_pending = report.still_pending,
            errors = report.errors.len(),
            "Stuck pending sync finished"
        );
        Ok(report)
    }

    async fn reconcile_session(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> BillingResult<SessionOutcome> {
        let id: CheckoutSessionId = session_id
            .parse()
            .map_err(|e| BillingError::Internal(format!("Invalid session id stored: {e}")))?;

        let session = CheckoutSession::retrieve(self.stripe.inner(), &id, &[]).await?;

        if session.payment_status == CheckoutSessionPaymentStatus::Paid {
            let subscription_id: SubscriptionId = session
                .subscription
                .as_ref()
                .ok_or_else(|| {
                    BillingError::Internal("Paid session has no subscription".to_string())
                })?
                .id()
                .parse()
                .map_err(|e| {
                    BillingError::Internal(format!("Invalid subscription id in session: {e}"))
                })?;

            let subscription =
                Subscription::retrieve(self.stripe.inner(), &subscription_id, &[]).await?;

            self.subscriptions
                .activate_from_checkout(
                    user_id,
                    session_id,
                    &subscription,
                    session.amount_total,
                    session.currency.map(|c| c.to_string()),
                )
                .await?;

            tracing::info!(
                user_id = %user_id,
                session_id = session_id,
                "Repaired stuck pending checkout, payment had succeeded"
            );
            return Ok(SessionOutcome::Activated);
        }

        if session.status == Some(CheckoutSessionStatus::Expired) {
            self.subscriptions.cancel_pending_checkout(session_id).await?;
            tracing::info!(
                user_id = %user_id,
                session_id = session_id,
                "Cancelled stuck pending checkout, session expired"
            );
            return Ok(SessionOutcome::Cancelled);
        }

        tracing::debug!(
            user_id = %user_id,
            session_id = session_id,
            "Checkout still open, payment not settled yet"
        );
        Ok(SessionOutcome::StillPending)
    }

    /// Fetch the raw subscription row for a user, for support diagnosis.
    pub async fn debug_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionDebug>> {
        let row = sqlx::query_as::<_, SubscriptionDebug>(
            r#"
            SELECT id, user_id, status, stripe_subscription_id, stripe_session_id,
                   current_period_start, current_period_end, amount_cents, currency,
                   reminder_sent, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

enum SessionOutcome {
    Activated,
    Cancelled,
    StillPending,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn empty_report_serializes_without_errors_field() {
        let report = PendingSyncReport {
            scanned: 3,
            still_pending: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scanned"], serde_json::json!(3));
        assert_eq!(json["stillPending"], serde_json::json!(3));
        assert!(json.get("errors").is_none());
    }
}
