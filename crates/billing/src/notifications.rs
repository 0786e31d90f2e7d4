//! User notifications
//!
//! Append-only: a notification is created as a side effect of a successful
//! state transition and never mutated afterwards (the read flag belongs to
//! the UI layer).

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO notifications (user_id, kind, title, body, read)
            VALUES ($1, $2, $3, $4, FALSE)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(user_id = %user_id, kind = kind, "Notification created");
        Ok(id.0)
    }

    /// "Payment succeeded" notification, created once per activation.
    pub async fn payment_success(&self, user_id: Uuid) -> BillingResult<Uuid> {
        self.insert(
            user_id,
            "payment_success",
            "Betaling succesvol",
            "Je jaarlijkse abonnement is geactiveerd. Je hebt nu toegang tot alle functies van Huurly.",
        )
        .await
    }

    /// "Expiring soon" reminder from the sweeper.
    pub async fn subscription_expiring(
        &self,
        user_id: Uuid,
        period_end: OffsetDateTime,
    ) -> BillingResult<Uuid> {
        let body = format!(
            "Je abonnement verloopt op {}. Verleng op tijd om toegang te behouden.",
            period_end.date()
        );
        self.insert(
            user_id,
            "subscription_expiring",
            "Abonnement verloopt binnenkort",
            &body,
        )
        .await
    }
}
