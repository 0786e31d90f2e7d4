//! Checkout session creation
//!
//! The checkout flow never touches subscription state beyond recording the
//! `pending` row; activation only ever happens from a verified webhook.

use std::collections::HashMap;

use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentMethodTypes, CreateCheckoutSessionSubscriptionData,
    CreateCustomer, Customer, ListCustomers,
};
use uuid::Uuid;

use huurly_shared::UserRole;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

/// Redirect URL for the hosted payment page, handed back to the client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Caller-supplied redirect targets for the hosted page. Both must stay on
/// the configured frontend origin; anything else falls back to the defaults
/// so the checkout flow cannot be used as an open redirect.
#[derive(Debug, Clone, Default)]
pub struct RedirectUrls {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool, subscriptions: SubscriptionService) -> Self {
        Self {
            stripe,
            pool,
            subscriptions,
        }
    }

    /// Start a subscription checkout for a user.
    ///
    /// The price is determined by the user's stored role, never by the
    /// request. Non-subscribing roles are rejected before any provider call.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        redirects: RedirectUrls,
    ) -> BillingResult<CheckoutResponse> {
        let (email, role): (String, String) =
            sqlx::query_as("SELECT email, role FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;

        let role = UserRole::from_str_lossy(&role);
        let price_id = self
            .stripe
            .config()
            .price_id_for_role(role)
            .ok_or_else(|| {
                BillingError::Internal(format!("No subscription plan for role {role}"))
            })?
            .to_string();

        let customer = self.find_or_create_customer(user_id, &email).await?;

        let frontend_url = &self.stripe.config().frontend_url;
        let success_url = sanitize_redirect(redirects.success_url, frontend_url)
            .unwrap_or_else(|| format!("{frontend_url}/betaling/succes"));
        let cancel_url = sanitize_redirect(redirects.cancel_url, frontend_url)
            .unwrap_or_else(|| format!("{frontend_url}/betaling/geannuleerd"));

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(customer.id.clone());
        params.payment_method_types = Some(vec![
            CreateCheckoutSessionPaymentMethodTypes::Card,
            CreateCheckoutSessionPaymentMethodTypes::Ideal,
        ]);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        // Mirror the user id onto the subscription object too, so events
        // carrying only the subscription can still be attributed.
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(metadata);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let url = session
            .url
            .clone()
            .ok_or_else(|| BillingError::StripeApi("Checkout session has no URL".to_string()))?;

        self.subscriptions
            .record_pending_checkout(user_id, session.id.as_str())
            .await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            "Checkout session created"
        );

        Ok(CheckoutResponse { url })
    }

    /// Look up the Stripe customer by email, creating one when absent.
    async fn find_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<Customer> {
        let existing = Customer::list(
            self.stripe.inner(),
            &ListCustomers {
                email: Some(email),
                ..Default::default()
            },
        )
        .await?;

        if let Some(customer) = existing.data.into_iter().next() {
            tracing::debug!(
                user_id = %user_id,
                customer_id = %customer.id,
                "Reusing existing Stripe customer"
            );
            return Ok(customer);
        }

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let customer = Customer::create(
            self.stripe.inner(),
            CreateCustomer {
                email: Some(email),
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );
        Ok(customer)
    }
}

/// Accept a caller-supplied redirect only when it stays on the frontend
/// origin.
fn sanitize_redirect(url: Option<String>, frontend_url: &str) -> Option<String> {
    let url = url?;
    let allowed = url == frontend_url
        || url
            .strip_prefix(frontend_url)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'));
    if allowed {
        Some(url)
    } else {
        tracing::warn!(url = url, "Rejected off-origin redirect URL");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRONTEND: &str = "https://huurly.nl";

    #[test]
    fn on_origin_redirect_is_accepted() {
        let url = sanitize_redirect(Some(format!("{FRONTEND}/dashboard?paid=1")), FRONTEND);
        assert_eq!(url.as_deref(), Some("https://huurly.nl/dashboard?paid=1"));
    }

    #[test]
    fn off_origin_redirect_is_rejected() {
        assert!(sanitize_redirect(Some("https://evil.example/phish".into()), FRONTEND).is_none());
    }

    #[test]
    fn prefix_spoof_is_rejected() {
        // Same string prefix, different host.
        assert!(
            sanitize_redirect(Some("https://huurly.nl.evil.example/x".into()), FRONTEND).is_none()
        );
    }

    #[test]
    fn absent_redirect_falls_back() {
        assert!(sanitize_redirect(None, FRONTEND).is_none());
    }
}
