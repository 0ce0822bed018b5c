//! Customer Session Management
//!
//! A session is bound to the customer of the ephemeral keys the host supplies.
//! Every operation first obtains a key (cached while it stays fresh, otherwise
//! pulled through the [`KeyBroker`]) and then calls the processor with it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::ephemeral_key::EphemeralKey;
use crate::error::Result;
use crate::key_broker::KeyBroker;
use crate::processor::{
    CustomerRecord, PaymentMethodKind, PaymentMethodRecord, PaymentProcessor, ShippingAddress,
};

/// Unique session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct CachedCustomer {
    record: CustomerRecord,
    fetched_at: Instant,
}

/// A live customer session
pub struct CustomerSession {
    id: SessionId,
    created_at: DateTime<Utc>,
    broker: Arc<KeyBroker>,
    processor: Arc<dyn PaymentProcessor>,
    key_refresh_leeway: Duration,
    customer_cache_ttl: Duration,
    key: Mutex<Option<EphemeralKey>>,
    customer: Mutex<Option<CachedCustomer>>,
}

impl CustomerSession {
    pub fn new(
        broker: Arc<KeyBroker>,
        processor: Arc<dyn PaymentProcessor>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            broker,
            processor,
            key_refresh_leeway: config.key_refresh_leeway,
            customer_cache_ttl: config.customer_cache_ttl,
            key: Mutex::new(None),
            customer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current ephemeral key, requesting a new one from the host when the
    /// cached key is missing or about to expire
    pub async fn ephemeral_key(&self) -> Result<EphemeralKey> {
        let cached = lock(&self.key).clone();
        if let Some(key) = cached.filter(|k| k.is_fresh(self.key_refresh_leeway, Utc::now())) {
            return Ok(key);
        }

        debug!(session_id = %self.id, "Fetching ephemeral key");
        let json = self.broker.request_key(self.processor.api_version()).await?;
        let key = EphemeralKey::from_json(&json)?;

        info!(
            session_id = %self.id,
            customer_id = %key.customer_id,
            expires_at = ?key.expires_at,
            "Ephemeral key received"
        );
        *lock(&self.key) = Some(key.clone());
        Ok(key)
    }

    /// The session's customer, served from cache while it is younger than the
    /// configured TTL
    pub async fn retrieve_customer(&self) -> Result<CustomerRecord> {
        if let Some(record) = self.cached_customer() {
            debug!(session_id = %self.id, "Customer served from cache");
            return Ok(record);
        }

        let key = self.ephemeral_key().await?;
        let record = self.processor.retrieve_customer(&key).await?;
        self.store_customer(record.clone());
        Ok(record)
    }

    /// Replace the customer's shipping details
    pub async fn update_customer(&self, shipping: &ShippingAddress) -> Result<CustomerRecord> {
        let key = self.ephemeral_key().await?;
        self.invalidate_customer();

        let record = self
            .processor
            .update_customer_shipping(&key, shipping)
            .await?;
        self.store_customer(record.clone());

        info!(session_id = %self.id, cleared = shipping.is_empty(), "Customer shipping updated");
        Ok(record)
    }

    pub async fn list_payment_methods(
        &self,
        kind: PaymentMethodKind,
    ) -> Result<Vec<PaymentMethodRecord>> {
        let key = self.ephemeral_key().await?;
        let methods = self.processor.list_payment_methods(&key, kind).await?;
        debug!(session_id = %self.id, %kind, count = methods.len(), "Listed payment methods");
        Ok(methods)
    }

    pub async fn attach_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord> {
        let key = self.ephemeral_key().await?;
        self.invalidate_customer();

        let record = self
            .processor
            .attach_payment_method(&key, payment_method_id)
            .await?;
        info!(session_id = %self.id, payment_method_id, "Payment method attached");
        Ok(record)
    }

    pub async fn detach_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodRecord> {
        let key = self.ephemeral_key().await?;
        self.invalidate_customer();

        let record = self
            .processor
            .detach_payment_method(&key, payment_method_id)
            .await?;
        info!(session_id = %self.id, payment_method_id, "Payment method detached");
        Ok(record)
    }

    /// Drop the cached key and customer
    pub fn clear_cache(&self) {
        lock(&self.key).take();
        self.invalidate_customer();
    }

    fn cached_customer(&self) -> Option<CustomerRecord> {
        lock(&self.customer)
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.customer_cache_ttl)
            .map(|c| c.record.clone())
    }

    fn store_customer(&self, record: CustomerRecord) {
        *lock(&self.customer) = Some(CachedCustomer {
            record,
            fetched_at: Instant::now(),
        });
    }

    fn invalidate_customer(&self) {
        lock(&self.customer).take();
    }
}

impl std::fmt::Debug for CustomerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("processor", &self.processor.name())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
