//! Host Channel Messages
//!
//! Method calls coming in from the host, the single response each one gets,
//! and the events the bridge pushes back to the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, ErrorPayload, Result};
use crate::key_broker::KeyRequestId;

/// A method call from the host: name plus argument map
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,

    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Call without arguments
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }

    /// Raw argument value, `None` when absent or null
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name).filter(|v| !v.is_null())
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    pub fn i64_arg(&self, name: &str) -> Option<i64> {
        self.arg(name).and_then(Value::as_i64)
    }

    pub fn u32_arg(&self, name: &str) -> Option<u32> {
        self.arg(name)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    pub fn required_str(&self, name: &str) -> Result<String> {
        self.str_arg(name)
            .map(str::to_owned)
            .ok_or_else(|| BridgeError::invalid_argument(name, "expected a string"))
    }
}

/// The one response a method call receives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MethodResponse {
    /// Completed; `payload` is absent for commands that return nothing
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Failed with a wire error
    Error(ErrorPayload),

    /// The method name is not part of the command surface
    NotImplemented,
}

impl MethodResponse {
    /// Success without payload
    pub fn ok() -> Self {
        Self::Success { payload: None }
    }

    pub fn payload(value: Value) -> Self {
        Self::Success {
            payload: Some(value),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn success_payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => payload.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Error(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Events the bridge sends to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum HostEvent {
    /// Ask the host to fetch an ephemeral key and answer with
    /// `onKeyUpdate` or `onKeyUpdateFailure`
    #[serde(rename = "createEphemeralKey", rename_all = "camelCase")]
    CreateEphemeralKey {
        api_version: String,
        request_id: KeyRequestId,
    },
}

impl HostEvent {
    pub fn method(&self) -> &'static str {
        match self {
            HostEvent::CreateEphemeralKey { .. } => "createEphemeralKey",
        }
    }
}

/// Outbound half of the host channel
///
/// Emitting is fire-and-forget: replies come back later as method calls.
pub trait HostChannel: Send + Sync {
    fn emit(&self, event: HostEvent) -> Result<()>;
}

/// In-process host channel backed by an unbounded tokio channel
#[derive(Clone, Debug)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelHost {
    /// Create the channel; the receiver is the host's event stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostChannel for ChannelHost {
    fn emit(&self, event: HostEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| BridgeError::ChannelClosed(format!("{} not delivered", e.0.method())))
    }
}

/// A method call paired with the slot its response goes to
#[derive(Debug)]
pub struct Envelope {
    pub call: MethodCall,
    pub reply: oneshot::Sender<MethodResponse>,
}

/// Inbound half of the host channel, held by the host
#[derive(Clone, Debug)]
pub struct MethodSender {
    tx: mpsc::Sender<Envelope>,
}

impl MethodSender {
    /// Create the channel; the receiver is handed to `Bridge::serve`
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Send a call and wait for its single response
    pub async fn call(&self, call: MethodCall) -> Result<MethodResponse> {
        let (reply, response) = oneshot::channel();
        let method = call.method.clone();

        self.tx
            .send(Envelope { call, reply })
            .await
            .map_err(|_| BridgeError::ChannelClosed(format!("{method} not delivered")))?;

        response
            .await
            .map_err(|_| BridgeError::ChannelClosed(format!("{method} got no response")))
    }
}
