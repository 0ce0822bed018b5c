//! Command Surface
//!
//! Maps host method names onto a typed [`Command`], parsing each command's
//! arguments up front so handlers work with domain types only.

use serde_json::Value;
use tracing::warn;

use crate::channel::MethodCall;
use crate::confirmation::ClientSecret;
use crate::config::PublishableKey;
use crate::error::{BridgeError, Result};
use crate::key_broker::{KeyJson, KeyRequestId};
use crate::payment_method::{BillingDetails, CardParams, PaymentMethodParams};
use crate::processor::{PaymentMethodKind, ShippingAddress};

/// Names of the methods the host may call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    Init,
    InitCustomerSession,
    OnKeyUpdate,
    OnKeyUpdateFailure,
    RetrieveCurrentCustomer,
    UpdateCurrentCustomer,
    GetPaymentMethods,
    AttachPaymentMethod,
    DetachPaymentMethod,
    EndCustomerSession,
    CreatePaymentMethodCard,
    AuthenticatePayment,
}

const COMMANDS: &[(&str, CommandName)] = &[
    ("init", CommandName::Init),
    ("initCustomerSession", CommandName::InitCustomerSession),
    ("onKeyUpdate", CommandName::OnKeyUpdate),
    ("onKeyUpdateFailure", CommandName::OnKeyUpdateFailure),
    ("retrieveCurrentCustomer", CommandName::RetrieveCurrentCustomer),
    ("updateCurrentCustomer", CommandName::UpdateCurrentCustomer),
    ("getPaymentMethods", CommandName::GetPaymentMethods),
    ("attachPaymentMethod", CommandName::AttachPaymentMethod),
    ("detachPaymentMethod", CommandName::DetachPaymentMethod),
    ("endCustomerSession", CommandName::EndCustomerSession),
    ("createPaymentMethodCard", CommandName::CreatePaymentMethodCard),
    ("authenticatePayment", CommandName::AuthenticatePayment),
];

impl CommandName {
    /// `None` for methods outside the command surface
    pub fn from_method(method: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, command)| *command)
    }

    pub fn method(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, command)| *command == self)
            .map_or("unknown", |(name, _)| *name)
    }

    /// Fixed message every processor failure of this command is reported with
    pub fn failure_message(self) -> &'static str {
        match self {
            CommandName::RetrieveCurrentCustomer => {
                "Failed to retrieve current customer. Possible connection issues."
            }
            CommandName::UpdateCurrentCustomer => {
                "Failed to update current customer. Possible connection issues."
            }
            CommandName::GetPaymentMethods => {
                "Failed to get payment methods. Possible connection issues."
            }
            CommandName::AttachPaymentMethod => {
                "Failed to attach payment method. Possible connection issues."
            }
            CommandName::DetachPaymentMethod => {
                "Failed to detach payment method. Possible connection issues."
            }
            CommandName::CreatePaymentMethodCard => "Failed to create payment method.",
            CommandName::AuthenticatePayment => "Failed to authenticate payment.",
            CommandName::Init
            | CommandName::InitCustomerSession
            | CommandName::OnKeyUpdate
            | CommandName::OnKeyUpdateFailure
            | CommandName::EndCustomerSession => "Command failed.",
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

/// A host command with parsed arguments
#[derive(Clone, Debug)]
pub enum Command {
    Init {
        publishable_key: PublishableKey,
    },
    InitCustomerSession,
    OnKeyUpdate {
        request_id: Option<KeyRequestId>,
        key: KeyJson,
    },
    OnKeyUpdateFailure {
        request_id: Option<KeyRequestId>,
        code: i64,
        message: String,
    },
    RetrieveCurrentCustomer,
    UpdateCurrentCustomer {
        shipping: ShippingAddress,
    },
    GetPaymentMethods {
        kind: PaymentMethodKind,
    },
    AttachPaymentMethod {
        id: String,
    },
    DetachPaymentMethod {
        id: String,
    },
    EndCustomerSession,
    CreatePaymentMethodCard {
        params: PaymentMethodParams,
    },
    AuthenticatePayment {
        client_secret: ClientSecret,
    },
}

const DEFAULT_KEY_FAILURE_MESSAGE: &str = "Ephemeral key request failed";

impl Command {
    /// Parse the arguments of a call already known to be `name`
    pub fn parse(name: CommandName, call: &MethodCall) -> Result<Self> {
        let command = match name {
            CommandName::Init => Command::Init {
                publishable_key: PublishableKey::new(call.required_str("publishableKey")?)?,
            },
            CommandName::InitCustomerSession => Command::InitCustomerSession,
            CommandName::OnKeyUpdate => Command::OnKeyUpdate {
                request_id: request_id(call),
                key: call.arg("stripeResponseJson").cloned().unwrap_or(Value::Null),
            },
            CommandName::OnKeyUpdateFailure => Command::OnKeyUpdateFailure {
                request_id: request_id(call),
                code: call.i64_arg("responseCode").unwrap_or(0),
                message: call
                    .str_arg("message")
                    .unwrap_or(DEFAULT_KEY_FAILURE_MESSAGE)
                    .to_owned(),
            },
            CommandName::RetrieveCurrentCustomer => Command::RetrieveCurrentCustomer,
            CommandName::UpdateCurrentCustomer => {
                let shipping = call.arg("shippingAddress").ok_or_else(|| {
                    BridgeError::invalid_argument("shippingAddress", "expected a mapping")
                })?;
                Command::UpdateCurrentCustomer {
                    shipping: serde_json::from_value(shipping.clone()).map_err(|e| {
                        BridgeError::invalid_argument("shippingAddress", e.to_string())
                    })?,
                }
            }
            CommandName::GetPaymentMethods => Command::GetPaymentMethods {
                kind: PaymentMethodKind::from_name(call.str_arg("type").unwrap_or_default()),
            },
            CommandName::AttachPaymentMethod => Command::AttachPaymentMethod {
                id: call.required_str("id")?,
            },
            CommandName::DetachPaymentMethod => Command::DetachPaymentMethod {
                id: call.required_str("id")?,
            },
            CommandName::EndCustomerSession => Command::EndCustomerSession,
            CommandName::CreatePaymentMethodCard => Command::CreatePaymentMethodCard {
                params: PaymentMethodParams::card(
                    CardParams {
                        number: call.str_arg("cardNumber").map(str::to_owned),
                        exp_month: call.u32_arg("cardExpMonth"),
                        exp_year: call.u32_arg("cardExpYear"),
                        cvc: call.str_arg("cardCvv").map(str::to_owned),
                    },
                    BillingDetails {
                        name: call.str_arg("billingDetailsName").map(str::to_owned),
                        email: call.str_arg("billingDetailsEmail").map(str::to_owned),
                    },
                ),
            },
            CommandName::AuthenticatePayment => Command::AuthenticatePayment {
                client_secret: ClientSecret::parse(&call.required_str("paymentIntentSecret")?)?,
            },
        };
        Ok(command)
    }

    pub fn name(&self) -> CommandName {
        match self {
            Command::Init { .. } => CommandName::Init,
            Command::InitCustomerSession => CommandName::InitCustomerSession,
            Command::OnKeyUpdate { .. } => CommandName::OnKeyUpdate,
            Command::OnKeyUpdateFailure { .. } => CommandName::OnKeyUpdateFailure,
            Command::RetrieveCurrentCustomer => CommandName::RetrieveCurrentCustomer,
            Command::UpdateCurrentCustomer { .. } => CommandName::UpdateCurrentCustomer,
            Command::GetPaymentMethods { .. } => CommandName::GetPaymentMethods,
            Command::AttachPaymentMethod { .. } => CommandName::AttachPaymentMethod,
            Command::DetachPaymentMethod { .. } => CommandName::DetachPaymentMethod,
            Command::EndCustomerSession => CommandName::EndCustomerSession,
            Command::CreatePaymentMethodCard { .. } => CommandName::CreatePaymentMethodCard,
            Command::AuthenticatePayment { .. } => CommandName::AuthenticatePayment,
        }
    }
}

/// A reply whose id cannot be read still settles the oldest waiting request,
/// so the operation behind it does not hang.
fn request_id(call: &MethodCall) -> Option<KeyRequestId> {
    let raw = call.str_arg("requestId")?;
    let parsed = KeyRequestId::parse(raw);
    if parsed.is_none() {
        warn!(
            method = %call.method,
            request_id = raw,
            "Unreadable requestId, settling the oldest pending key request"
        );
    }
    parsed
}
