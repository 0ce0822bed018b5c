//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key_broker::KeyRequestId;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    /// `init` has not been called with a publishable key yet
    #[error("Publishable key not configured")]
    NotInitialized,

    /// Session operation without a live customer session
    #[error("No active customer session")]
    NoSession,

    /// Missing or malformed command argument
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Ephemeral key could not be obtained from the host
    #[error("Ephemeral key error: {0}")]
    Key(#[from] KeyError),

    /// Outbound event could not be delivered to the host
    #[error("Host channel closed: {0}")]
    ChannelClosed(String),

    /// Processor rejected the request
    #[error("Processor error: {0}")]
    Processor(String),

    /// Processor unreachable or timing out
    #[error("Processor unavailable: {0}")]
    Unavailable(String),

    /// Credential refused by the processor
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Processor or host payload did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Unavailable(_) | BridgeError::Key(KeyError::TimedOut(_))
        )
    }

    /// Whether the error collapses into the per-operation generic failure on
    /// the wire. Configuration, session and argument errors keep their own codes.
    pub fn is_flattened(&self) -> bool {
        !matches!(
            self,
            BridgeError::NotInitialized
                | BridgeError::NoSession
                | BridgeError::InvalidArgument { .. }
        )
    }

    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NotInitialized => "not_initialized",
            BridgeError::NoSession => "no_session",
            BridgeError::InvalidArgument { .. } => "invalid_argument",
            _ => GENERIC_ERROR_CODE,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::NotInitialized => {
                "Stripe is not initialized. Call init with a publishable key first.".into()
            }
            BridgeError::NoSession => {
                "No active customer session. Call initCustomerSession first.".into()
            }
            BridgeError::InvalidArgument { name, reason } => {
                format!("Invalid argument '{name}': {reason}")
            }
            BridgeError::Unavailable(_) => {
                "The payment service is currently unreachable. Please try again.".into()
            }
            _ => "An error occurred processing your request.".into(),
        }
    }
}

/// Failures resolving an ephemeral key request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The host answered with `onKeyUpdateFailure`
    #[error("host reported failure {code}: {message}")]
    Host { code: i64, message: String },

    /// No answer within the configured key request timeout
    #[error("key request {0} timed out")]
    TimedOut(KeyRequestId),

    /// The broker went away before the request was answered
    #[error("key request {0} was abandoned")]
    Abandoned(KeyRequestId),

    /// The `createEphemeralKey` event could not be emitted
    #[error("host channel closed: {0}")]
    ChannelClosed(String),
}

/// Code used for every flattened processor failure
pub const GENERIC_ERROR_CODE: &str = "0";

/// Error shape sent back over the channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Flattened failure with code `"0"`
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GENERIC_ERROR_CODE, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&BridgeError> for ErrorPayload {
    fn from(err: &BridgeError) -> Self {
        let payload = Self::new(err.code(), err.user_message());
        match err {
            BridgeError::InvalidArgument { name, reason } => {
                payload.with_details(serde_json::json!({"argument": name, "reason": reason}))
            }
            _ => payload,
        }
    }
}
