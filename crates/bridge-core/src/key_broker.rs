//! Ephemeral Key Broker
//!
//! Session operations need a short-lived customer key that only the host can
//! mint (normally through a merchant backend). The broker asks for one by
//! emitting `createEphemeralKey` and parks the caller until the host answers
//! with `onKeyUpdate` or `onKeyUpdateFailure`.
//!
//! ```text
//!  session op ──request_key──▶ KeyBroker ──createEphemeralKey──▶ host
//!       ▲                         │ pending queue                 │
//!       └──────── key JSON ◀──────┴◀──── onKeyUpdate(requestId?) ─┘
//! ```
//!
//! Pending requests are kept in arrival order. A reply naming a `requestId`
//! settles that request; a reply without one settles the oldest request whose
//! caller is still waiting. A reply with nothing pending is ignored.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::{HostChannel, HostEvent};
use crate::error::KeyError;

/// Identifier correlating a `createEphemeralKey` event with its reply
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRequestId(Uuid);

impl KeyRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for KeyRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KeyRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw key JSON as returned by the processor to the merchant backend
pub type KeyJson = Value;

/// Outcome of one key request
pub type KeyResult = std::result::Result<KeyJson, KeyError>;

struct PendingRequest {
    id: KeyRequestId,
    completion: oneshot::Sender<KeyResult>,
}

impl PendingRequest {
    fn is_live(&self) -> bool {
        !self.completion.is_closed()
    }
}

/// Brokers ephemeral keys between session operations and the host
pub struct KeyBroker {
    host: Arc<dyn HostChannel>,
    pending: Mutex<VecDeque<PendingRequest>>,
    timeout: Option<Duration>,
}

impl KeyBroker {
    pub fn new(host: Arc<dyn HostChannel>) -> Self {
        Self {
            host,
            pending: Mutex::new(VecDeque::new()),
            timeout: None,
        }
    }

    /// Fail requests the host leaves unanswered for longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the host for a key and wait for its answer
    pub async fn request_key(&self, api_version: &str) -> KeyResult {
        let id = KeyRequestId::new();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.queue();
            pending.retain(PendingRequest::is_live);
            pending.push_back(PendingRequest { id, completion: tx });
        }

        debug!(request_id = %id, api_version, "Requesting ephemeral key from host");

        let event = HostEvent::CreateEphemeralKey {
            api_version: api_version.to_owned(),
            request_id: id,
        };
        if let Err(e) = self.host.emit(event) {
            self.remove(id);
            return Err(KeyError::ChannelClosed(e.to_string()));
        }

        let received = match self.timeout {
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, rx).await {
                    received
                } else {
                    self.remove(id);
                    warn!(request_id = %id, timeout = ?limit, "Ephemeral key request timed out");
                    return Err(KeyError::TimedOut(id));
                }
            }
            None => rx.await,
        };

        received.unwrap_or(Err(KeyError::Abandoned(id)))
    }

    /// Resolve a pending request with the host's key JSON.
    ///
    /// Returns whether a waiting request received the key.
    pub fn on_key_update(&self, request_id: Option<KeyRequestId>, json: KeyJson) -> bool {
        self.resolve(request_id, Ok(json))
    }

    /// Resolve a pending request with the host's failure
    pub fn on_key_update_failure(
        &self,
        request_id: Option<KeyRequestId>,
        code: i64,
        message: impl Into<String>,
    ) -> bool {
        self.resolve(
            request_id,
            Err(KeyError::Host {
                code,
                message: message.into(),
            }),
        )
    }

    /// Requests still waiting for the host
    pub fn pending_count(&self) -> usize {
        self.queue().iter().filter(|p| p.is_live()).count()
    }

    fn resolve(&self, request_id: Option<KeyRequestId>, result: KeyResult) -> bool {
        let next = {
            let mut pending = self.queue();
            take_next(&mut pending, request_id)
        };

        let Some(request) = next else {
            debug!(request_id = ?request_id, "Key reply with no pending request, ignoring");
            return false;
        };

        debug!(
            request_id = %request.id,
            success = result.is_ok(),
            "Resolving ephemeral key request"
        );
        request.completion.send(result).is_ok()
    }

    fn remove(&self, id: KeyRequestId) {
        self.queue().retain(|p| p.id != id);
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_next(
    pending: &mut VecDeque<PendingRequest>,
    request_id: Option<KeyRequestId>,
) -> Option<PendingRequest> {
    match request_id {
        Some(id) => {
            let index = pending.iter().position(|p| p.id == id)?;
            pending.remove(index).filter(PendingRequest::is_live)
        }
        None => {
            while let Some(request) = pending.pop_front() {
                if request.is_live() {
                    return Some(request);
                }
            }
            None
        }
    }
}
