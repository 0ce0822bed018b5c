//! Mock Processor and Authentication Context
//!
//! In-memory stand-ins for the payments API and the host's challenge UI. Used
//! by tests and by the demo when no Stripe credentials are configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::config::PublishableKey;
use crate::confirmation::{
    AuthenticationContext, ChallengeOutcome, ClientSecret, IntentStatus, NextAction,
};
use crate::ephemeral_key::EphemeralKey;
use crate::error::{BridgeError, Result};
use crate::payment_method::PaymentMethodParams;
use crate::processor::{
    CustomerRecord, JsonMap, PaymentMethodKind, PaymentMethodRecord, PaymentProcessor,
    ShippingAddress,
};

/// API version the mock asks the host to mint keys for
pub const MOCK_API_VERSION: &str = "2020-08-27";

/// Card number the mock declines
pub const DECLINED_CARD: &str = "4000000000000002";

/// How a scripted payment intent moves through its statuses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntentScript {
    /// Status before anything happens
    pub initial: IntentStatus,
    /// Status right after a client-side confirm
    pub after_confirm: IntentStatus,
    /// Status on the next fetch after a `requires_action` status was served
    pub after_action: IntentStatus,
}

impl IntentScript {
    /// Confirms straight to `succeeded`
    pub fn frictionless() -> Self {
        Self {
            initial: IntentStatus::RequiresConfirmation,
            after_confirm: IntentStatus::Succeeded,
            after_action: IntentStatus::Succeeded,
        }
    }

    /// Confirms into a 3-D Secure redirect, then lands on `after_action`
    pub fn challenged(after_action: IntentStatus) -> Self {
        Self {
            initial: IntentStatus::RequiresConfirmation,
            after_confirm: IntentStatus::RequiresAction,
            after_action,
        }
    }

    /// Stuck in `status` whatever happens
    pub fn already(status: IntentStatus) -> Self {
        Self {
            initial: status,
            after_confirm: status,
            after_action: status,
        }
    }
}

struct ScriptedIntent {
    script: IntentScript,
    status: IntentStatus,
    secret: String,
    action_served: bool,
}

impl ScriptedIntent {
    fn serve(&mut self, id: &str) -> JsonMap {
        let next_action = if self.status == IntentStatus::RequiresAction {
            self.action_served = true;
            json!({
                "type": "redirect_to_url",
                "redirect_to_url": {
                    "url": format!("https://hooks.stripe.com/3d_secure/{id}"),
                    "return_url": "stripe-bridge://return"
                }
            })
        } else {
            Value::Null
        };

        let mut intent = JsonMap::new();
        intent.insert("id".into(), json!(id));
        intent.insert("object".into(), json!("payment_intent"));
        intent.insert("status".into(), json!(self.status));
        intent.insert("client_secret".into(), json!(self.secret));
        intent.insert("next_action".into(), next_action);
        intent
    }
}

#[derive(Default)]
struct MockState {
    customers: BTreeMap<String, CustomerRecord>,
    payment_methods: BTreeMap<String, PaymentMethodRecord>,
    intents: HashMap<String, ScriptedIntent>,
    last_params: Option<PaymentMethodParams>,
    calls: Vec<&'static str>,
    offline: bool,
    sequence: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_mock{:04}", self.sequence)
    }

    fn record(&mut self, call: &'static str) -> Result<()> {
        self.calls.push(call);
        if self.offline {
            return Err(BridgeError::Unavailable("mock processor offline".into()));
        }
        Ok(())
    }

    fn customer_mut(&mut self, key: &EphemeralKey) -> Result<&mut CustomerRecord> {
        self.customers.get_mut(&key.customer_id).ok_or_else(|| {
            BridgeError::Authentication(format!("No such customer: '{}'", key.customer_id))
        })
    }

    fn payment_method_mut(&mut self, id: &str) -> Result<&mut PaymentMethodRecord> {
        self.payment_methods
            .get_mut(id)
            .ok_or_else(|| BridgeError::Processor(format!("No such PaymentMethod: '{id}'")))
    }

    fn intent_mut(&mut self, secret: &ClientSecret) -> Result<&mut ScriptedIntent> {
        self.intents
            .get_mut(secret.intent_id())
            .filter(|i| i.secret == secret.expose())
            .ok_or_else(|| {
                BridgeError::Processor(format!("No such payment_intent: '{}'", secret.intent_id()))
            })
    }
}

/// In-memory payments API
#[derive(Default)]
pub struct MockProcessor {
    state: Mutex<MockState>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key JSON for `customer_id`, valid for an hour. The customer is created
    /// on first use.
    pub fn issue_ephemeral_key(&self, customer_id: &str) -> Value {
        let mut state = self.state();
        state
            .customers
            .entry(customer_id.to_owned())
            .or_insert_with(|| customer_json(customer_id));
        let id = state.next_id("ephkey");
        let secret = state.next_id("ek_test");

        json!({
            "id": id,
            "object": "ephemeral_key",
            "secret": secret,
            "created": Utc::now().timestamp(),
            "expires": Utc::now().timestamp() + 3600,
            "livemode": false,
            "associated_objects": [{"type": "customer", "id": customer_id}]
        })
    }

    /// Register an intent and return its client secret
    pub fn script_intent(&self, intent_id: &str, script: IntentScript) -> ClientSecret {
        let secret = ClientSecret::from_parts(intent_id, "mock");
        self.state().intents.insert(
            intent_id.to_owned(),
            ScriptedIntent {
                script,
                status: script.initial,
                secret: secret.expose().to_owned(),
                action_served: false,
            },
        );
        secret
    }

    /// Create a payment method of `kind`, optionally attached to a customer
    pub fn seed_payment_method(
        &self,
        customer_id: Option<&str>,
        kind: PaymentMethodKind,
    ) -> String {
        let mut state = self.state();
        let id = state.next_id("pm");
        state.payment_methods.insert(
            id.clone(),
            payment_method_json(&id, kind, customer_id, &PaymentMethodParams::default()),
        );
        id
    }

    /// Fail every call with an unavailable error while set
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn customer(&self, id: &str) -> Option<CustomerRecord> {
        self.state().customers.get(id).cloned()
    }

    pub fn payment_method(&self, id: &str) -> Option<PaymentMethodRecord> {
        self.state().payment_methods.get(id).cloned()
    }

    pub fn last_payment_method_params(&self) -> Option<PaymentMethodParams> {
        self.state().last_params.clone()
    }

    /// Names of processor calls in the order they were made
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    fn name(&self) -> &str {
        "MockProcessor"
    }

    fn api_version(&self) -> &str {
        MOCK_API_VERSION
    }

    async fn retrieve_customer(&self, key: &EphemeralKey) -> Result<CustomerRecord> {
        let mut state = self.state();
        state.record("retrieve_customer")?;
        state.customer_mut(key).map(|c| c.clone())
    }

    async fn update_customer_shipping(
        &self,
        key: &EphemeralKey,
        shipping: &ShippingAddress,
    ) -> Result<CustomerRecord> {
        let mut state = self.state();
        state.record("update_customer_shipping")?;
        let customer = state.customer_mut(key)?;
        customer.insert("shipping".into(), shipping_json(shipping));
        Ok(customer.clone())
    }

    async fn list_payment_methods(
        &self,
        key: &EphemeralKey,
        kind: PaymentMethodKind,
    ) -> Result<Vec<PaymentMethodRecord>> {
        let mut state = self.state();
        state.record("list_payment_methods")?;
        state.customer_mut(key)?;

        Ok(state
            .payment_methods
            .values()
            .filter(|pm| {
                pm.get("customer").and_then(Value::as_str) == Some(key.customer_id.as_str())
            })
            .filter(|pm| pm.get("type").and_then(Value::as_str) == Some(kind.as_str()))
            .cloned()
            .collect())
    }

    async fn attach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord> {
        let mut state = self.state();
        state.record("attach_payment_method")?;
        state.customer_mut(key)?;

        let pm = state.payment_method_mut(payment_method_id)?;
        pm.insert("customer".into(), json!(key.customer_id));
        Ok(pm.clone())
    }

    async fn detach_payment_method(
        &self,
        key: &EphemeralKey,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord> {
        let mut state = self.state();
        state.record("detach_payment_method")?;
        state.customer_mut(key)?;

        let pm = state.payment_method_mut(payment_method_id)?;
        if pm.get("customer").and_then(Value::as_str) != Some(key.customer_id.as_str()) {
            return Err(BridgeError::Processor(format!(
                "The payment method {payment_method_id} is not attached to a customer"
            )));
        }
        pm.insert("customer".into(), Value::Null);
        Ok(pm.clone())
    }

    async fn create_payment_method(
        &self,
        _publishable_key: &PublishableKey,
        params: &PaymentMethodParams,
    ) -> Result<PaymentMethodRecord> {
        let mut state = self.state();
        state.record("create_payment_method")?;
        state.last_params = Some(params.clone());

        if params.card.number.as_deref() == Some(DECLINED_CARD) {
            return Err(BridgeError::Processor("Your card was declined.".into()));
        }

        let id = state.next_id("pm");
        let record = payment_method_json(&id, params.kind(), None, params);
        state.payment_methods.insert(id, record.clone());
        Ok(record)
    }

    async fn retrieve_payment_intent(
        &self,
        _publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<JsonMap> {
        let mut state = self.state();
        state.record("retrieve_payment_intent")?;

        let intent = state.intent_mut(client_secret)?;
        if intent.status == IntentStatus::RequiresAction && intent.action_served {
            intent.status = intent.script.after_action;
            intent.action_served = false;
        }
        Ok(intent.serve(client_secret.intent_id()))
    }

    async fn confirm_payment_intent(
        &self,
        _publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<JsonMap> {
        let mut state = self.state();
        state.record("confirm_payment_intent")?;

        let intent = state.intent_mut(client_secret)?;
        intent.status = intent.script.after_confirm;
        intent.action_served = false;
        Ok(intent.serve(client_secret.intent_id()))
    }
}

fn customer_json(id: &str) -> CustomerRecord {
    let mut customer = JsonMap::new();
    customer.insert("id".into(), json!(id));
    customer.insert("object".into(), json!("customer"));
    customer.insert("email".into(), json!(format!("{id}@example.com")));
    customer.insert("shipping".into(), Value::Null);
    customer.insert("livemode".into(), json!(false));
    customer
}

fn shipping_json(shipping: &ShippingAddress) -> Value {
    if shipping.is_empty() {
        return Value::Null;
    }
    json!({
        "name": shipping.name,
        "phone": shipping.phone,
        "address": {
            "line1": shipping.line1,
            "line2": shipping.line2,
            "city": shipping.city,
            "state": shipping.state,
            "postal_code": shipping.postal_code,
            "country": shipping.country
        }
    })
}

fn payment_method_json(
    id: &str,
    kind: PaymentMethodKind,
    customer_id: Option<&str>,
    params: &PaymentMethodParams,
) -> PaymentMethodRecord {
    let mut record = JsonMap::new();
    record.insert("id".into(), json!(id));
    record.insert("object".into(), json!("payment_method"));
    record.insert("type".into(), json!(kind.as_str()));
    record.insert("customer".into(), json!(customer_id));
    record.insert(
        "billing_details".into(),
        json!({
            "name": params.billing_details.name,
            "email": params.billing_details.email
        }),
    );
    if kind == PaymentMethodKind::Card {
        record.insert(
            "card".into(),
            json!({
                "brand": "visa",
                "last4": params.card.last4(),
                "exp_month": params.card.exp_month,
                "exp_year": params.card.exp_year
            }),
        );
    }
    record.insert("livemode".into(), json!(false));
    record
}

/// Authentication context that answers every challenge the same way
pub struct MockAuthenticationContext {
    outcome: ChallengeOutcome,
    challenges: Mutex<Vec<(String, NextAction)>>,
}

impl MockAuthenticationContext {
    pub fn new(outcome: ChallengeOutcome) -> Self {
        Self {
            outcome,
            challenges: Mutex::new(Vec::new()),
        }
    }

    /// Customer completes every challenge
    pub fn completing() -> Self {
        Self::new(ChallengeOutcome::Completed)
    }

    /// Customer dismisses every challenge
    pub fn canceling() -> Self {
        Self::new(ChallengeOutcome::Canceled)
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::new(ChallengeOutcome::Failed(reason.into()))
    }

    /// Challenges presented so far as (intent id, action)
    pub fn challenges(&self) -> Vec<(String, NextAction)> {
        self.challenges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuthenticationContext for MockAuthenticationContext {
    async fn present_challenge(&self, intent_id: &str, action: &NextAction) -> ChallengeOutcome {
        self.challenges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((intent_id.to_owned(), action.clone()));
        self.outcome.clone()
    }
}
