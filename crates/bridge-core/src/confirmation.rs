//! Payment Confirmation Engine
//!
//! Drives a server-created payment intent from the client side until it
//! reaches a terminal state, presenting authentication challenges (3-D Secure
//! redirects, SDK challenges) through the host's [`AuthenticationContext`].
//!
//! ```text
//!                ┌─────────── confirm ───────────┐
//!                │                               ▼
//!  requires_confirmation / requires_payment_method     requires_action ──challenge──▶ re-fetch
//!                                                          │
//!  succeeded / requires_capture / processing ─▶ Succeeded  │ canceled challenge ─▶ Canceled
//!  canceled ─▶ Canceled                                    │ failed challenge ───▶ Failed
//!  requires_payment_method after confirm ─▶ Failed ◀───────┘ too many rounds
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PublishableKey;
use crate::error::{BridgeError, Result};
use crate::processor::{JsonMap, PaymentProcessor};

/// Client secret of a payment intent (`pi_..._secret_...`)
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret {
    secret: String,
    intent_id: String,
}

impl ClientSecret {
    pub fn parse(secret: &str) -> Result<Self> {
        let (intent_id, tail) = secret.split_once("_secret_").ok_or_else(|| {
            BridgeError::invalid_argument(
                "paymentIntentSecret",
                "not a payment intent client secret",
            )
        })?;

        if intent_id.is_empty() || tail.is_empty() {
            return Err(BridgeError::invalid_argument(
                "paymentIntentSecret",
                "not a payment intent client secret",
            ));
        }

        Ok(Self {
            secret: secret.to_owned(),
            intent_id: intent_id.to_owned(),
        })
    }

    pub(crate) fn from_parts(intent_id: &str, tail: &str) -> Self {
        Self {
            secret: format!("{intent_id}_secret_{tail}"),
            intent_id: intent_id.to_owned(),
        }
    }

    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret authorizes the intent; only its id is printable
        f.debug_struct("ClientSecret")
            .field("intent_id", &self.intent_id)
            .finish_non_exhaustive()
    }
}

/// Payment intent status as reported by the processor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// What the customer has to do before the intent can proceed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextAction {
    /// Open `url` (3-D Secure page, bank redirect) and come back to `return_url`
    RedirectToUrl {
        url: String,
        return_url: Option<String>,
    },

    /// Native SDK challenge; the payload is passed through untouched
    UseStripeSdk(Value),

    /// Any other action type
    Other { kind: String, raw: Value },
}

impl NextAction {
    fn from_json(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let action = match kind {
            "redirect_to_url" => {
                let redirect = value.get("redirect_to_url")?;
                NextAction::RedirectToUrl {
                    url: redirect.get("url")?.as_str()?.to_owned(),
                    return_url: redirect
                        .get("return_url")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                }
            }
            "use_stripe_sdk" => {
                let payload = value.get("use_stripe_sdk").cloned().unwrap_or(Value::Null);
                NextAction::UseStripeSdk(payload)
            }
            other => NextAction::Other {
                kind: other.to_owned(),
                raw: value.clone(),
            },
        };
        Some(action)
    }

    pub fn kind(&self) -> &str {
        match self {
            NextAction::RedirectToUrl { .. } => "redirect_to_url",
            NextAction::UseStripeSdk(_) => "use_stripe_sdk",
            NextAction::Other { kind, .. } => kind.as_str(),
        }
    }
}

/// The parts of a payment intent the engine looks at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentSnapshot {
    pub id: String,
    pub status: IntentStatus,
    pub next_action: Option<NextAction>,
}

impl IntentSnapshot {
    pub fn from_json(intent: &JsonMap) -> Result<Self> {
        let id = intent
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Decode("payment intent has no id".into()))?
            .to_owned();

        let status = intent
            .get("status")
            .cloned()
            .ok_or_else(|| BridgeError::Decode("payment intent has no status".into()))
            .and_then(|s| {
                serde_json::from_value(s)
                    .map_err(|e| BridgeError::Decode(format!("payment intent status: {e}")))
            })?;

        let next_action = intent
            .get("next_action")
            .filter(|v| !v.is_null())
            .and_then(NextAction::from_json);

        Ok(Self {
            id,
            status,
            next_action,
        })
    }
}

/// Result of presenting a challenge to the customer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Customer went through the challenge; the processor has the verdict
    Completed,
    /// Customer dismissed the challenge
    Canceled,
    /// Challenge could not be presented or errored
    Failed(String),
}

/// Host capability for presenting interactive authentication
#[async_trait]
pub trait AuthenticationContext: Send + Sync {
    async fn present_challenge(&self, intent_id: &str, action: &NextAction) -> ChallengeOutcome;
}

/// Terminal state of a confirmation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Fetched,
    Confirmed,
    Challenged,
}

/// Drives payment intents to a terminal state
pub struct ConfirmationEngine {
    processor: Arc<dyn PaymentProcessor>,
    auth: Arc<dyn AuthenticationContext>,
    max_rounds: u32,
}

impl ConfirmationEngine {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        auth: Arc<dyn AuthenticationContext>,
        max_rounds: u32,
    ) -> Self {
        Self {
            processor,
            auth,
            max_rounds,
        }
    }

    /// Confirm and authenticate the intent behind `client_secret`.
    ///
    /// Transport and decode failures come back as `Err`; every definitive
    /// status comes back as a [`ConfirmationOutcome`].
    pub async fn authenticate_payment(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<ConfirmationOutcome> {
        let intent_id = client_secret.intent_id();
        debug!(intent_id, "Authenticating payment intent");

        let mut intent = self.fetch(publishable_key, client_secret).await?;
        let mut stage = Stage::Fetched;
        let mut rounds = 0;

        loop {
            debug!(intent_id, status = ?intent.status, stage = ?stage, "Payment intent state");

            match (intent.status, stage) {
                (
                    IntentStatus::Succeeded
                    | IntentStatus::RequiresCapture
                    | IntentStatus::Processing,
                    _,
                ) => {
                    info!(intent_id, status = ?intent.status, "Payment intent succeeded");
                    return Ok(ConfirmationOutcome::Succeeded);
                }

                (IntentStatus::Canceled, _) => return Ok(ConfirmationOutcome::Canceled),

                // Manual confirmation: the merchant server confirms after the challenge
                (IntentStatus::RequiresConfirmation, Stage::Challenged) => {
                    return Ok(ConfirmationOutcome::Succeeded);
                }

                (
                    IntentStatus::RequiresConfirmation | IntentStatus::RequiresPaymentMethod,
                    Stage::Fetched,
                ) => {
                    intent = self.confirm(publishable_key, client_secret).await?;
                    stage = Stage::Confirmed;
                }

                (IntentStatus::RequiresAction, _) => {
                    if rounds >= self.max_rounds {
                        warn!(intent_id, rounds, "Too many authentication rounds");
                        return Ok(ConfirmationOutcome::Failed);
                    }
                    rounds += 1;

                    let Some(action) = intent.next_action.take() else {
                        warn!(intent_id, "Intent requires action but has no next_action");
                        return Ok(ConfirmationOutcome::Failed);
                    };

                    match self.auth.present_challenge(&intent.id, &action).await {
                        ChallengeOutcome::Completed => {
                            intent = self.fetch(publishable_key, client_secret).await?;
                            stage = Stage::Challenged;
                        }
                        ChallengeOutcome::Canceled => {
                            info!(intent_id, action = action.kind(), "Authentication canceled");
                            return Ok(ConfirmationOutcome::Canceled);
                        }
                        ChallengeOutcome::Failed(reason) => {
                            warn!(
                                intent_id,
                                action = action.kind(),
                                reason = %reason,
                                "Authentication failed"
                            );
                            return Ok(ConfirmationOutcome::Failed);
                        }
                    }
                }

                (
                    IntentStatus::RequiresConfirmation
                    | IntentStatus::RequiresPaymentMethod
                    | IntentStatus::Unknown,
                    _,
                ) => {
                    warn!(intent_id, status = ?intent.status, "Payment intent did not complete");
                    return Ok(ConfirmationOutcome::Failed);
                }
            }
        }
    }

    async fn fetch(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<IntentSnapshot> {
        let json = self
            .processor
            .retrieve_payment_intent(publishable_key, client_secret)
            .await?;
        IntentSnapshot::from_json(&json)
    }

    async fn confirm(
        &self,
        publishable_key: &PublishableKey,
        client_secret: &ClientSecret,
    ) -> Result<IntentSnapshot> {
        let json = self
            .processor
            .confirm_payment_intent(publishable_key, client_secret)
            .await?;
        IntentSnapshot::from_json(&json)
    }
}
