//! Stripe API Error Types

use bridge_core::BridgeError;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, StripeApiError>;

/// Stripe REST errors
#[derive(Error, Debug)]
pub enum StripeApiError {
    /// Request never produced a response (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe answered with an error object
    #[error("Stripe API error ({status}, {kind}): {message}")]
    Api {
        status: u16,
        kind: String,
        code: Option<String>,
        message: String,
    },

    /// Response body was not the JSON object we expected
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripeApiError {
    /// Build from a non-2xx response body
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error }) => StripeApiError::Api {
                status,
                kind: error.kind.unwrap_or_else(|| "api_error".into()),
                code: error.code,
                message: error
                    .message
                    .unwrap_or_else(|| format!("request failed with status {status}")),
            },
            Err(_) => StripeApiError::Api {
                status,
                kind: "api_error".into(),
                code: None,
                message: format!("request failed with status {status}"),
            },
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StripeApiError::Http(e) => e.is_timeout() || e.is_connect(),
            StripeApiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<StripeApiError> for BridgeError {
    fn from(err: StripeApiError) -> Self {
        match err {
            StripeApiError::Api {
                status: 401,
                message,
                ..
            } => BridgeError::Authentication(message),
            e if e.is_retryable() => BridgeError::Unavailable(e.to_string()),
            StripeApiError::Http(e) => BridgeError::Unavailable(e.to_string()),
            StripeApiError::Api { message, .. } => BridgeError::Processor(message),
            StripeApiError::UnexpectedResponse(detail) => BridgeError::Decode(detail),
            StripeApiError::Config(detail) => BridgeError::Processor(detail),
        }
    }
}
