//! # bridge-stripe
//!
//! Stripe REST implementation of the bridge's `PaymentProcessor`.
//!
//! ```text
//! ┌──────────────┐   form-encoded POST / GET    ┌──────────────────┐
//! │  StripeApi   │─────────────────────────────▶│  api.stripe.com  │
//! │              │  Authorization: Bearer ...   │       /v1        │
//! │              │◀─────────────────────────────│                  │
//! └──────────────┘   JSON object / error body   └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_stripe::{StripeApi, StripeConfig};
//!
//! let api = StripeApi::new(StripeConfig::from_env())?;
//! let bridge = Bridge::new(Arc::new(api), host, auth, BridgeConfig::from_env());
//! ```

mod client;
mod config;
mod error;
mod form;

pub use client::StripeApi;
pub use config::{DEFAULT_API_BASE, DEFAULT_API_VERSION, StripeConfig};
pub use error::{Result, StripeApiError};
pub use form::{FormPairs, confirm_form, payment_method_form, shipping_form};
