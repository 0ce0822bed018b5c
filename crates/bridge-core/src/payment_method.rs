//! Payment Method Factory
//!
//! Tokenizes card details into a payment method. Needs only the publishable
//! key, not a customer session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PublishableKey;
use crate::error::Result;
use crate::processor::{PaymentMethodKind, PaymentProcessor, PaymentMethodRecord};

/// Raw card fields; each is passed through only when present
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardParams {
    pub number: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
    pub cvc: Option<String>,
}

impl CardParams {
    /// Last four digits of the number, if long enough
    pub fn last4(&self) -> Option<&str> {
        let number = self.number.as_deref()?;
        number
            .len()
            .checked_sub(4)
            .and_then(|start| number.get(start..))
    }
}

impl std::fmt::Debug for CardParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardParams")
            .field("last4", &self.last4())
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .field("cvc", &self.cvc.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Payment method creation request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentMethodParams {
    pub card: CardParams,
    pub billing_details: BillingDetails,
}

impl PaymentMethodParams {
    pub fn card(card: CardParams, billing_details: BillingDetails) -> Self {
        Self {
            card,
            billing_details,
        }
    }

    pub fn kind(&self) -> PaymentMethodKind {
        PaymentMethodKind::Card
    }
}

/// Creates payment methods through the processor's API client
pub struct PaymentMethodFactory {
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentMethodFactory {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }

    pub async fn create_card(
        &self,
        publishable_key: &PublishableKey,
        params: &PaymentMethodParams,
    ) -> Result<PaymentMethodRecord> {
        debug!(card = ?params.card, "Creating card payment method");

        self.processor
            .create_payment_method(publishable_key, params)
            .await
            .inspect_err(|e| warn!(error = %e, "Payment method creation failed"))
    }
}
