//! Payment Processor Strategy
//!
//! The processor is everything behind the bridge that talks to the payments
//! API: the Stripe REST client in production, an in-memory mock in tests.
//! Customer-scoped calls authenticate with an [`EphemeralKey`]; tokenization
//! and payment intent calls use the merchant's [`PublishableKey`].
//!
//! Records come back as raw JSON objects so the host sees every field the
//! processor returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PublishableKey;
use crate::confirmation::ClientSecret;
use crate::ephemeral_key::EphemeralKey;
use crate::error::Result;
use crate::payment_method::PaymentMethodParams;

/// A JSON object as returned by the processor
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// All fields the processor returns for a customer
pub type CustomerRecord = JsonMap;

/// All fields the processor returns for a payment method
pub type PaymentMethodRecord = JsonMap;

/// Payment method types that can be listed for a customer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    #[default]
    Card,
    CardPresent,
    Ideal,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::CardPresent => "card_present",
            PaymentMethodKind::Ideal => "ideal",
        }
    }

    /// Unrecognized names fall back to `card`
    pub fn from_name(name: &str) -> Self {
        match name {
            "card_present" => PaymentMethodKind::CardPresent,
            "ideal" => PaymentMethodKind::Ideal,
            _ => PaymentMethodKind::Card,
        }
    }
}

impl std::fmt::Display for PaymentMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipping details written onto the customer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl ShippingAddress {
    /// No field set; sending it clears the customer's shipping details
    pub fn is_empty(&self) -> bool {
        [
            &self.name,
            &self.phone,
            &self.line1,
            &self.line2,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|field| field.is_none())
    }
}

/// Strategy trait for payment processors
///
/// Implementations do no retries; every failure is returned to the caller.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Processor name for logs
    fn name(&self) -> &str;

    /// API version sent with `createEphemeralKey` so the backend mints a
    /// compatible key
    fn api_version(&self) -> &str;

    /// Fetch the customer the key belongs to
    async fn retrieve_customer(&self, key: &EphemeralKey) -> Result<CustomerRecord>;

    /// Replace the customer's shipping details, returning the updated customer
    async fn update_customer_shipping(
        &self,
        key: &EphemeralKey,
        shipping: &ShippingAddress,
    ) -> Result<CustomerRecord>;

    /// Payment methods of the given type attached to the customer
    async fn list_payment_methods(
        &self,
        key: &EphemeralKey,
        kind: PaymentMethodKind,
    ) -> Result<Vec<PaymentMethodRecord>>;

    async fn attach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord>;

    async fn detach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord>;

    /// Tokenize a payment instrument
    async fn create_payment_method(
        &self,
        publishable_key: &PublishableKey,
        params: &PaymentMethodParams,
    ) -> Result<PaymentMethodRecord>;

    /// Current state of the payment intent the secret belongs to
    async fn retrieve_payment_intent(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<JsonMap>;

    /// Confirm the payment intent from the client side
    async fn confirm_payment_intent(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<JsonMap>;
}
