//! Ephemeral Key
//!
//! Typed view of the key JSON the host relays from its backend:
//!
//! ```json
//! {
//!   "id": "ephkey_1Gq...",
//!   "secret": "ek_test_...",
//!   "expires": 1589467207,
//!   "livemode": false,
//!   "associated_objects": [{"type": "customer", "id": "cus_H8..."}]
//! }
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::config::redact;
use crate::error::{BridgeError, Result};

#[derive(Deserialize)]
struct RawEphemeralKey {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    expires: Option<i64>,
    #[serde(default)]
    livemode: bool,
    #[serde(default)]
    associated_objects: Vec<AssociatedObject>,
}

#[derive(Deserialize)]
struct AssociatedObject {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

/// A customer-scoped ephemeral key
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralKey {
    pub id: Option<String>,
    secret: String,
    pub customer_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub livemode: bool,
}

impl EphemeralKey {
    /// Parse the host's key JSON.
    ///
    /// The key must carry a secret and be associated with a customer.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let raw: RawEphemeralKey = serde_json::from_value(json.clone())
            .map_err(|e| BridgeError::Decode(format!("ephemeral key: {e}")))?;

        let secret = raw
            .secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BridgeError::Decode("ephemeral key has no secret".into()))?;

        let customer_id = raw
            .associated_objects
            .into_iter()
            .find(|o| o.kind == "customer")
            .map(|o| o.id)
            .ok_or_else(|| {
                BridgeError::Decode("ephemeral key is not associated with a customer".into())
            })?;

        let expires_at = match raw.expires {
            Some(secs) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                BridgeError::Decode(format!("ephemeral key expiry out of range: {secs}"))
            })?),
            None => None,
        };

        Ok(Self {
            id: raw.id,
            secret,
            customer_id,
            expires_at,
            livemode: raw.livemode,
        })
    }

    /// Bearer credential for customer-scoped calls
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the key stays valid for at least `leeway` past `now`.
    /// Keys without an expiry are never considered fresh.
    pub fn is_fresh(&self, leeway: Duration, now: DateTime<Utc>) -> bool {
        let leeway = TimeDelta::from_std(leeway).unwrap_or(TimeDelta::MAX);
        self.expires_at
            .is_some_and(|expires| now.checked_add_signed(leeway).is_some_and(|t| expires > t))
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("id", &self.id)
            .field("secret", &redact(&self.secret))
            .field("customer_id", &self.customer_id)
            .field("expires_at", &self.expires_at)
            .field("livemode", &self.livemode)
            .finish()
    }
}
