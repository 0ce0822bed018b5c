//! # bridge-core
//!
//! Client-side orchestration for a payments SDK exposed to a host application
//! over an asynchronous method channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Bridge                                │
//! │  ┌───────────────┐  ┌──────────────────┐  ┌───────────────────┐  │
//! │  │   Customer    │  │  Payment Method  │  │   Confirmation    │  │
//! │  │   Session     │  │     Factory      │  │      Engine       │  │
//! │  └───────┬───────┘  └────────┬─────────┘  └─────────┬─────────┘  │
//! │          │                   │                      │            │
//! │  ┌───────▼───────┐  ┌────────▼──────────────────────▼─────────┐  │
//! │  │  Key Broker   │  │        PaymentProcessor (Strategy)      │  │
//! │  └───────┬───────┘  └─────────────────────────────────────────┘  │
//! └──────────┼───────────────────────────────────────────────────────┘
//!            │ createEphemeralKey ▲ onKeyUpdate / onKeyUpdateFailure
//!            ▼                    │
//!                    Host
//! ```
//!
//! The `PaymentProcessor` trait lets the bridge run against the Stripe REST
//! API (`bridge-stripe`) or the in-memory [`mock::MockProcessor`].

pub mod bridge;
pub mod channel;
pub mod command;
pub mod config;
pub mod confirmation;
pub mod ephemeral_key;
pub mod error;
pub mod key_broker;
pub mod mock;
pub mod payment_method;
pub mod processor;
pub mod session;

pub use bridge::Bridge;
pub use channel::{ChannelHost, HostChannel, HostEvent, MethodCall, MethodResponse, MethodSender};
pub use config::{BridgeConfig, PublishableKey};
pub use confirmation::{
    AuthenticationContext, ChallengeOutcome, ClientSecret, ConfirmationOutcome, NextAction,
};
pub use ephemeral_key::EphemeralKey;
pub use error::{BridgeError, ErrorPayload, KeyError, Result};
pub use key_broker::{KeyBroker, KeyRequestId};
pub use payment_method::{BillingDetails, CardParams, PaymentMethodParams};
pub use processor::{PaymentMethodKind, PaymentProcessor, ShippingAddress};
pub use session::{CustomerSession, SessionId};
