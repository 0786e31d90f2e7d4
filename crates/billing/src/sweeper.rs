//! Periodic subscription maintenance
//!
//! Two passes over the subscriptions table: reminders for rows that expire
//! within the reminder window, and expiration of rows whose period end has
//! passed. Both are claim-based so overlapping runs (cron plus the manual
//! endpoint) never double-notify or double-count.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::error::BillingResult;
use crate::notifications::NotificationService;
use std::sync::Arc;

/// Result of one maintenance run. Each pass reports independently; one pass
/// failing does not suppress the other's counts.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub reminders_sent: usize,
    pub subscriptions_expired: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl MaintenanceSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone)]
pub struct SweeperService {
    pool: PgPool,
    notifications: NotificationService,
    cache: Arc<StatusCache>,
    reminder_window_days: i64,
}

impl SweeperService {
    pub fn new(
        pool: PgPool,
        notifications: NotificationService,
        cache: Arc<StatusCache>,
        reminder_window_days: i64,
    ) -> Self {
        Self {
            pool,
            notifications,
            cache,
            reminder_window_days,
        }
    }

    /// Run both passes, capturing each failure instead of aborting the run.
    pub async fn run_maintenance(&self) -> MaintenanceSummary {
        let mut summary = MaintenanceSummary {
            reminders_sent: 0,
            subscriptions_expired: 0,
            errors: Vec::new(),
        };

        match self.remind_expiring().await {
            Ok(count) => summary.reminders_sent = count,
            Err(e) => {
                tracing::error!(error = %e, "Expiry reminder pass failed");
                summary.errors.push(format!("reminders: {e}"));
            }
        }

        match self.expire_overdue().await {
            Ok(count) => summary.subscriptions_expired = count,
            Err(e) => {
                tracing::error!(error = %e, "Expiration pass failed");
                summary.errors.push(format!("expiration: {e}"));
            }
        }

        tracing::info!(
            reminders_sent = summary.reminders_sent,
            subscriptions_expired = summary.subscriptions_expired,
            errors = summary.errors.len(),
            "Subscription maintenance run finished"
        );
        summary
    }

    /// Notify users whose active subscription ends within the reminder
    /// window. The `reminder_sent` flag is claimed row by row with a
    /// conditional UPDATE, so a concurrent run skips rows this one took.
    pub async fn remind_expiring(&self) -> BillingResult<usize> {
        let eligible: Vec<(Uuid, Uuid, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, user_id, current_period_end
            FROM subscriptions
            WHERE status = 'active'
              AND reminder_sent = FALSE
              AND current_period_end IS NOT NULL
              AND current_period_end <= NOW() + ($1 || ' days')::INTERVAL
              AND current_period_end > NOW()
            "#,
        )
        .bind(self.reminder_window_days)
        .fetch_all(&self.pool)
        .await?;

        let mut sent = 0usize;
        for (id, user_id, period_end) in eligible {
            let claimed: Option<(Uuid,)> = sqlx::query_as(
                r#"
                UPDATE subscriptions
                SET reminder_sent = TRUE, updated_at = NOW()
                WHERE id = $1 AND reminder_sent = FALSE
                RETURNING id
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if claimed.is_none() {
                continue;
            }

            match self
                .notifications
                .subscription_expiring(user_id, period_end)
                .await
            {
                Ok(_) => {
                    sent += 1;
                    tracing::info!(
                        user_id = %user_id,
                        period_end = %period_end,
                        "Expiry reminder sent"
                    );
                }
                Err(e) => {
                    // The flag stays claimed; re-arming it here would make a
                    // persistent notification failure spam every run.
                    tracing::error!(
                        user_id = %user_id,
                        error = %e,
                        "Expiry reminder notification failed"
                    );
                }
            }
        }

        Ok(sent)
    }

    /// Expire every active subscription whose period end has passed, in one
    /// statement, then drop the affected cache entries.
    pub async fn expire_overdue(&self) -> BillingResult<usize> {
        let expired: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active'
              AND current_period_end IS NOT NULL
              AND current_period_end < NOW()
            RETURNING user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (user_id,) in &expired {
            self.cache.invalidate(*user_id).await;
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired overdue subscriptions");
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn summary_is_clean_without_errors() {
        let summary = MaintenanceSummary {
            reminders_sent: 3,
            subscriptions_expired: 1,
            errors: Vec::new(),
        };
        assert!(summary.is_clean());
    }

    #[test]
    fn summary_serializes_counts_and_omits_empty_errors() {
        let summary = MaintenanceSummary {
            reminders_sent: 2,
            subscriptions_expired: 0,
            errors: Vec::new(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["remindersSent"], serde_json::json!(2));
        assert_eq!(json["subscriptionsExpired"], serde_json::json!(0));
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn summary_reports_partial_failure() {
        let summary = MaintenanceSummary {
            reminders_sent: 0,
            subscriptions_expired: 4,
            errors: vec!["reminders: Database error: timeout".to_string()],
        };
        assert!(!summary.is_clean());
        assert_eq!(summary.subscriptions_expired, 4);
    }
}
