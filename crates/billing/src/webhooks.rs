//! Stripe webhook verification and reconciliation
//!
//! The webhook path is the only place subscription state is driven by the
//! payment provider. Every event is signature-verified, then atomically
//! claimed in `stripe_webhook_events` so duplicate and concurrent deliveries
//! of the same event id process exactly once.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use std::time::Duration;
use stripe::{Event, EventObject, EventType, Subscription, SubscriptionId, Webhook};
use time::OffsetDateTime;
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::notifications::NotificationService;
use crate::subscriptions::{SubscriptionService, UpdateOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Events that are reclaimed from a crashed worker after this long.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Doubling delay schedule for retried provider lookups: `attempts` delays
/// starting at `initial`, each double the previous.
pub fn retry_delays(attempts: u32, initial: Duration) -> Vec<Duration> {
    (0..attempts)
        .map(|i| initial.saturating_mul(1u32 << i.min(31)))
        .collect()
}

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// Pure so the tolerance and mismatch paths are unit-testable: `now` is the
/// caller's clock in unix seconds.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> BillingResult<()> {
    // Header format: t=<unix ts>,v1=<hex hmac>[,v0=...]
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    if (now - timestamp).unsigned_abs() > tolerance.as_secs() {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Whether this handler reacts to the given event type. Everything else is
/// acknowledged and dropped so the provider does not redeliver.
pub fn handled_event_type(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::CheckoutSessionCompleted
            | EventType::CheckoutSessionExpired
            | EventType::CheckoutSessionAsyncPaymentFailed
            | EventType::CustomerSubscriptionUpdated
            | EventType::CustomerSubscriptionDeleted
    )
}

#[derive(Clone)]
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
    notifications: NotificationService,
}

impl WebhookHandler {
    pub fn new(
        stripe: StripeClient,
        pool: PgPool,
        subscriptions: SubscriptionService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            stripe,
            pool,
            subscriptions,
            notifications,
        }
    }

    /// Verify and parse a webhook delivery.
    ///
    /// Tries the SDK's verifier first, then falls back to manual HMAC
    /// verification so newer provider API versions the SDK cannot parse
    /// strictly still get through with their signature checked.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let config = self.stripe.config();

        match Webhook::construct_event(payload, signature, &config.webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(
                    stripe_error = %e,
                    "SDK webhook verification failed, falling back to manual check"
                );
            }
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(
            payload,
            signature,
            &config.webhook_secret,
            config.webhook_timestamp_tolerance,
            now,
        )?;

        serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse verified webhook payload");
            BillingError::WebhookSignatureInvalid
        })
    }

    /// Process a verified event exactly once.
    ///
    /// The INSERT...ON CONFLICT...RETURNING claim guarantees a single worker
    /// wins even when the same event id arrives concurrently; the DO UPDATE
    /// arm reclaims events stuck in `processing` past the timeout so a
    /// crashed worker cannot wedge an event forever.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        // Event types with no handler are acknowledged without a claim, so
        // the provider stops redelivering and the events table only holds
        // what we act on.
        if !handled_event_type(event.type_) {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Ignoring unhandled webhook event type"
            );
            return Ok(());
        }

        // Re-claimable states: a previous 'error' result (our HTTP failure
        // told the provider to redeliver; this delivery is the retry) and a
        // 'processing' claim stuck past the timeout (crashed worker).
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at
                           < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, already claimed"
            );
            return Ok(());
        }

        tracing::info!(
            event_id = %event_id,
            event_type = %event_type_str,
            "Processing webhook event"
        );

        let result = self.process_event(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                processing_result = processing_result,
                error = %e,
                "Failed to record webhook processing result; event may be reclaimed after the timeout"
            );
        }

        result
    }

    async fn process_event(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event).await
            }
            EventType::CheckoutSessionExpired | EventType::CheckoutSessionAsyncPaymentFailed => {
                self.handle_checkout_failed(event).await
            }
            EventType::CustomerSubscriptionUpdated => self.handle_subscription_updated(event).await,
            EventType::CustomerSubscriptionDeleted => self.handle_subscription_deleted(event).await,
            // handle_event filters on handled_event_type before claiming.
            other => Err(BillingError::WebhookEventNotSupported(other.to_string())),
        }
    }

    /// `checkout.session.completed`: fetch the subscription the session
    /// created and activate the user's row. The provider lookup is retried
    /// on transient failures; dropping the event here would strand the user
    /// in `pending` after a successful payment.
    async fn handle_checkout_completed(&self, event: &Event) -> BillingResult<()> {
        let session = extract_checkout_session(event)?;
        let user_id = session_user_id(session)?;

        let subscription_id: SubscriptionId = session
            .subscription
            .as_ref()
            .ok_or_else(|| {
                BillingError::Internal("Completed checkout session has no subscription".to_string())
            })?
            .id()
            .parse()
            .map_err(|e| {
                BillingError::Internal(format!("Invalid subscription id in session: {e}"))
            })?;

        let config = self.stripe.config();
        let delays = retry_delays(
            config.webhook_retry_attempts,
            config.webhook_retry_initial_delay,
        );

        let subscription = RetryIf::spawn(
            delays.into_iter(),
            || {
                let client = self.stripe.inner().clone();
                let subscription_id = subscription_id.clone();
                async move {
                    Subscription::retrieve(&client, &subscription_id, &[])
                        .await
                        .map_err(BillingError::from)
                }
            },
            |e: &BillingError| e.is_retryable(),
        )
        .await?;

        let transitioned = self
            .subscriptions
            .activate_from_checkout(
                user_id,
                session.id.as_str(),
                &subscription,
                session.amount_total,
                session.currency.map(|c| c.to_string()),
            )
            .await?;

        if transitioned {
            // Re-applied events skip this branch, so a redelivery can never
            // notify twice.
            if let Err(e) = self.notifications.payment_success(user_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Subscription activated but payment notification failed"
                );
            }
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Subscription activated from checkout"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Checkout completion re-applied, row already current"
            );
        }

        Ok(())
    }

    /// `checkout.session.expired` / async payment failure: the pending row
    /// for this session becomes cancelled. A session that already activated
    /// is left alone.
    async fn handle_checkout_failed(&self, event: &Event) -> BillingResult<()> {
        let session = extract_checkout_session(event)?;
        let session_id = session.id.as_str();

        match self.subscriptions.cancel_pending_checkout(session_id).await? {
            UpdateOutcome::Applied(user_id) => {
                tracing::info!(
                    user_id = %user_id,
                    session_id = session_id,
                    "Pending checkout cancelled"
                );
            }
            UpdateOutcome::AlreadyCurrent(user_id) => {
                tracing::debug!(
                    user_id = %user_id,
                    session_id = session_id,
                    "Checkout failure ignored, subscription no longer pending on this session"
                );
            }
            UpdateOutcome::NotFound => {
                tracing::warn!(
                    session_id = session_id,
                    "Checkout failure for unknown session"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: &Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        match self.subscriptions.apply_provider_update(subscription).await? {
            UpdateOutcome::Applied(user_id) => {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %subscription.id,
                    status = %subscription.status,
                    "Subscription updated from provider"
                );
            }
            UpdateOutcome::AlreadyCurrent(_) => {
                tracing::debug!(
                    subscription_id = %subscription.id,
                    "Subscription update re-applied, row already current"
                );
            }
            UpdateOutcome::NotFound => {
                // Out-of-order delivery: the update raced the completion
                // event. The completion handler reads current provider state,
                // so dropping this is safe.
                tracing::warn!(
                    subscription_id = %subscription.id,
                    "Subscription update for unknown subscription, dropped"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        match self
            .subscriptions
            .cancel_by_provider(subscription.id.as_str())
            .await?
        {
            UpdateOutcome::Applied(user_id) => {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %subscription.id,
                    "Subscription cancelled from provider"
                );
            }
            UpdateOutcome::AlreadyCurrent(_) => {
                tracing::debug!(
                    subscription_id = %subscription.id,
                    "Subscription deletion re-applied, row already cancelled"
                );
            }
            UpdateOutcome::NotFound => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    "Subscription deletion for unknown subscription, dropped"
                );
            }
        }

        Ok(())
    }
}

fn extract_checkout_session(event: &Event) -> BillingResult<&stripe::CheckoutSession> {
    match &event.data.object {
        EventObject::CheckoutSession(session) => Ok(session),
        _ => Err(BillingError::WebhookEventNotSupported(format!(
            "Expected checkout session payload for {}",
            event.type_
        ))),
    }
}

fn extract_subscription(event: &Event) -> BillingResult<&Subscription> {
    match &event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(format!(
            "Expected subscription payload for {}",
            event.type_
        ))),
    }
}

fn session_user_id(session: &stripe::CheckoutSession) -> BillingResult<Uuid> {
    let raw = session
        .metadata
        .as_ref()
        .and_then(|m| m.get("user_id"))
        .ok_or_else(|| {
            BillingError::Internal("Checkout session has no user_id metadata".to_string())
        })?;

    Uuid::parse_str(raw)
        .map_err(|e| BillingError::Internal(format!("Invalid user_id in session metadata: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    const SECRET: &str = "whsec_test_secret";
    const TOLERANCE: Duration = Duration::from_secs(300);

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_000).is_ok());
    }

    #[test]
    fn signature_within_tolerance_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_299).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, 1_700_000_000);
        let result = verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_301);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(r#"{"id":"evt_1"}"#, SECRET, 1_700_000_000);
        let result = verify_signature(
            r#"{"id":"evt_2"}"#,
            &header,
            SECRET,
            TOLERANCE,
            1_700_000_000,
        );
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, "whsec_other", 1_700_000_000);
        let result = verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let result = verify_signature("{}", "not-a-header", SECRET, TOLERANCE, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn retry_schedule_doubles_from_initial() {
        let delays = retry_delays(5, Duration::from_secs(2));
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(32),
            ]
        );
    }

    #[test]
    fn zero_retries_means_empty_schedule() {
        assert!(retry_delays(0, Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn handled_types_match_reconciliation_surface() {
        assert!(handled_event_type(EventType::CheckoutSessionCompleted));
        assert!(handled_event_type(EventType::CheckoutSessionExpired));
        assert!(handled_event_type(EventType::CheckoutSessionAsyncPaymentFailed));
        assert!(handled_event_type(EventType::CustomerSubscriptionUpdated));
        assert!(handled_event_type(EventType::CustomerSubscriptionDeleted));
        assert!(!handled_event_type(EventType::InvoicePaid));
        assert!(!handled_event_type(EventType::CustomerCreated));
    }
}
