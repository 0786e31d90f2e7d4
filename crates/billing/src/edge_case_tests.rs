// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Boundary conditions and race-adjacent behavior in:
//! - Webhook signature verification
//! - Retry scheduling
//! - Status mapping
//! - Status cache
//! - Wire views

#[cfg(test)]
mod signature_edge_cases {
    use crate::error::BillingError;
    use crate::webhooks::verify_signature;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::time::Duration;

    const SECRET: &str = "whsec_edge_secret";
    const TOLERANCE: Duration = Duration::from_secs(300);

    fn sign_at(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    // =========================================================================
    // Timestamp exactly at the tolerance boundary is still accepted
    // =========================================================================
    #[test]
    fn timestamp_at_exact_tolerance_boundary_passes() {
        let payload = r#"{"id":"evt_b"}"#;
        let header = sign_at(payload, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_300).is_ok());
    }

    // =========================================================================
    // A future-dated timestamp is checked with the same tolerance
    // =========================================================================
    #[test]
    fn future_timestamp_beyond_tolerance_rejected() {
        let payload = r#"{"id":"evt_b"}"#;
        let header = sign_at(payload, 1_700_000_600);
        let result = verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    // =========================================================================
    // Extra scheme entries (v0) in the header are ignored, v1 still checked
    // =========================================================================
    #[test]
    fn v0_entry_is_ignored() {
        let payload = r#"{"id":"evt_b"}"#;
        let header = format!("{},v0=deadbeef", sign_at(payload, 1_700_000_000));
        assert!(verify_signature(payload, &header, SECRET, TOLERANCE, 1_700_000_000).is_ok());
    }

    // =========================================================================
    // Header missing the v1 entry entirely
    // =========================================================================
    #[test]
    fn missing_v1_entry_rejected() {
        let result = verify_signature(
            "{}",
            "t=1700000000,v0=deadbeef",
            SECRET,
            TOLERANCE,
            1_700_000_000,
        );
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    // =========================================================================
    // Non-numeric timestamp value
    // =========================================================================
    #[test]
    fn garbage_timestamp_rejected() {
        let result = verify_signature(
            "{}",
            "t=yesterday,v1=deadbeef",
            SECRET,
            TOLERANCE,
            1_700_000_000,
        );
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    // =========================================================================
    // Empty payload still signs and verifies; content is not interpreted here
    // =========================================================================
    #[test]
    fn empty_payload_verifies_against_its_own_signature() {
        let header = sign_at("", 1_700_000_000);
        assert!(verify_signature("", &header, SECRET, TOLERANCE, 1_700_000_000).is_ok());
    }
}

#[cfg(test)]
mod retry_schedule_edge_cases {
    use crate::webhooks::retry_delays;
    use std::time::Duration;

    // =========================================================================
    // One retry yields exactly the initial delay
    // =========================================================================
    #[test]
    fn single_retry_uses_initial_delay() {
        assert_eq!(
            retry_delays(1, Duration::from_secs(2)),
            vec![Duration::from_secs(2)]
        );
    }

    // =========================================================================
    // Large attempt counts must not overflow the doubling shift
    // =========================================================================
    #[test]
    fn large_attempt_count_does_not_panic() {
        let delays = retry_delays(40, Duration::from_millis(1));
        assert_eq!(delays.len(), 40);
        // Past the shift cap the schedule plateaus instead of wrapping.
        assert!(delays[39] >= delays[30]);
    }

    // =========================================================================
    // Sum of the default schedule stays under the provider delivery timeout
    // =========================================================================
    #[test]
    fn default_schedule_total_under_delivery_timeout() {
        let total: Duration = retry_delays(5, Duration::from_secs(2)).iter().sum();
        assert_eq!(total, Duration::from_secs(62));
        assert!(total < Duration::from_secs(120));
    }
}

#[cfg(test)]
mod status_mapping_edge_cases {
    use crate::status::SubscriptionStatus;

    // =========================================================================
    // Empty string from the store falls back to the no-access default
    // =========================================================================
    #[test]
    fn empty_stored_status_maps_to_pending() {
        let status = SubscriptionStatus::from_db_str("");
        assert_eq!(status, SubscriptionStatus::Pending);
        assert!(!status.grants_access());
    }

    // =========================================================================
    // Casing matters for stored statuses; "Active" is not "active"
    // =========================================================================
    #[test]
    fn stored_status_is_case_sensitive() {
        assert_eq!(
            SubscriptionStatus::from_db_str("Active"),
            SubscriptionStatus::Pending
        );
    }

    // =========================================================================
    // Display matches the stored representation
    // =========================================================================
    #[test]
    fn display_matches_as_str() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(status.to_string(), status.as_str());
        }
    }
}

#[cfg(test)]
mod cache_edge_cases {
    use crate::cache::StatusCache;
    use crate::subscriptions::SubscriptionStatusView;
    use std::time::Duration;
    use uuid::Uuid;

    // =========================================================================
    // Overwriting an entry restarts its TTL clock
    // =========================================================================
    #[tokio::test]
    async fn reinsert_restarts_ttl() {
        let cache = StatusCache::new(Duration::from_millis(60));
        let user = Uuid::new_v4();

        cache.insert(user, SubscriptionStatusView::inactive()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert(user, SubscriptionStatusView::inactive()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // 80ms after the first insert, but only 40ms after the second.
        assert!(cache.get(user).await.is_some());
    }

    // =========================================================================
    // Sweeping an empty cache is a no-op
    // =========================================================================
    #[tokio::test]
    async fn sweep_on_empty_cache_removes_nothing() {
        let cache = StatusCache::new(Duration::from_secs(60));
        assert_eq!(cache.sweep_expired().await, 0);
    }

    // =========================================================================
    // Invalidating an absent user is a no-op, not an error
    // =========================================================================
    #[tokio::test]
    async fn invalidate_unknown_user_is_noop() {
        let cache = StatusCache::new(Duration::from_secs(60));
        cache.invalidate(Uuid::new_v4()).await;
        assert_eq!(cache.sweep_expired().await, 0);
    }
}

#[cfg(test)]
mod view_edge_cases {
    use crate::subscriptions::SubscriptionStatusView;
    use time::OffsetDateTime;

    // =========================================================================
    // Active view round-trips through JSON with all fields present
    // =========================================================================
    #[test]
    fn active_view_round_trips() {
        let view = SubscriptionStatusView {
            has_active_subscription: true,
            subscription_type: Some("yearly".to_string()),
            expires_at: Some(OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap()),
            stripe_subscription_id: Some("sub_rt".to_string()),
        };

        let json = serde_json::to_string(&view).unwrap();
        let back: SubscriptionStatusView = serde_json::from_str(&json).unwrap();
        assert!(back.has_active_subscription);
        assert_eq!(back.subscription_type.as_deref(), Some("yearly"));
        assert_eq!(back.stripe_subscription_id.as_deref(), Some("sub_rt"));
    }

    // =========================================================================
    // Inactive JSON without optional fields deserializes cleanly
    // =========================================================================
    #[test]
    fn sparse_inactive_json_deserializes() {
        let back: SubscriptionStatusView =
            serde_json::from_str(r#"{"hasActiveSubscription":false}"#).unwrap();
        assert!(!back.has_active_subscription);
        assert!(back.expires_at.is_none());
    }
}
