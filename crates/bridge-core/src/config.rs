//! Bridge Configuration
//!
//! Tunables for the key broker, the customer session caches and the
//! confirmation engine, plus the merchant's publishable key.

use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Bridge tunables
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Give up on an unanswered `createEphemeralKey` after this long.
    /// `None` waits for the host indefinitely.
    pub key_request_timeout: Option<Duration>,

    /// A cached ephemeral key is refreshed once it is this close to expiring
    pub key_refresh_leeway: Duration,

    /// How long a retrieved customer is served from the session cache
    pub customer_cache_ttl: Duration,

    /// Upper bound on authentication challenges for one confirmation
    pub max_authentication_rounds: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            key_request_timeout: None,
            key_refresh_leeway: Duration::from_secs(60),
            customer_cache_ttl: Duration::from_secs(60),
            max_authentication_rounds: 3,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            key_request_timeout: parse_secs(std::env::var("BRIDGE_KEY_TIMEOUT_SECS").ok()),
            key_refresh_leeway: parse_secs(std::env::var("BRIDGE_KEY_REFRESH_LEEWAY_SECS").ok())
                .unwrap_or(defaults.key_refresh_leeway),
            customer_cache_ttl: parse_secs(std::env::var("BRIDGE_CUSTOMER_CACHE_SECS").ok())
                .unwrap_or(defaults.customer_cache_ttl),
            max_authentication_rounds: std::env::var("BRIDGE_MAX_AUTH_ROUNDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_authentication_rounds),
        }
    }

    pub fn with_key_request_timeout(mut self, timeout: Duration) -> Self {
        self.key_request_timeout = Some(timeout);
        self
    }

    pub fn with_customer_cache_ttl(mut self, ttl: Duration) -> Self {
        self.customer_cache_ttl = ttl;
        self
    }
}

fn parse_secs(value: Option<String>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Merchant publishable key (`pk_test_...` / `pk_live_...`)
#[derive(Clone, PartialEq, Eq)]
pub struct PublishableKey(String);

impl PublishableKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(BridgeError::invalid_argument(
                "publishableKey",
                "must not be empty",
            ));
        }
        if !key.starts_with("pk_") {
            return Err(BridgeError::invalid_argument(
                "publishableKey",
                "expected a pk_test_ or pk_live_ key",
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_live(&self) -> bool {
        self.0.starts_with("pk_live_")
    }

    /// Prefix plus the last four characters, safe for logs
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl std::fmt::Debug for PublishableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublishableKey").field(&self.redacted()).finish()
    }
}

/// Secrets shorter than this print without a tail
const REDACT_MIN_LEN: usize = 16;

pub(crate) fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take_while(|c| *c != '_').collect();
    let len = secret.chars().count();
    if len < REDACT_MIN_LEN {
        return format!("{prefix}_...");
    }
    let tail: String = secret.chars().skip(len - 4).collect();
    format!("{prefix}_...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert!(config.key_request_timeout.is_none());
        assert_eq!(config.key_refresh_leeway, Duration::from_secs(60));
        assert_eq!(config.max_authentication_rounds, 3);

        let config = config.with_key_request_timeout(Duration::from_millis(250));
        assert_eq!(config.key_request_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs(Some("30".into())), Some(Duration::from_secs(30)));
        assert_eq!(parse_secs(Some("soon".into())), None);
        assert_eq!(parse_secs(None), None);
    }

    #[test]
    fn test_publishable_key() {
        assert!(PublishableKey::new("  ").is_err());
        // Secret keys must never reach the client
        assert!(PublishableKey::new("sk_test_51abcdWXYZ").is_err());

        let key = PublishableKey::new("pk_test_51abcdWXYZ").unwrap();
        assert!(!key.is_live());
        assert_eq!(key.redacted(), "pk_...WXYZ");
        assert!(!format!("{key:?}").contains("51abcd"));
    }

    #[test]
    fn test_short_secrets_print_no_tail() {
        assert_eq!(redact("ek_test_abc"), "ek_...");
        assert_eq!(redact("pk_test_51abcdWXYZ"), "pk_...WXYZ");
    }
}
