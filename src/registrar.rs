//! Idempotent usage registration.
//!
//! A record that already holds a token is never registered again: the
//! metering call may bill the customer, so once a result is cached it is the
//! result.

use crate::client::http::MeteringClient;
use crate::protocol::models::RegisterUsageRequest;
use crate::retry::RetryPolicy;
use crate::store::{EntitlementRecord, EntitlementStore};
use crate::MeterwardenError;
use backon::Retryable;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Obtains and caches the metering token for an entitlement record.
pub struct Registrar {
    store: Arc<dyn EntitlementStore>,
    metering: Arc<dyn MeteringClient>,
    product_code: &'static str,
    public_key_version: i32,
    signature_key: &'static str,
    retry: RetryPolicy,
}

impl Registrar {
    /// Create a registrar.
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        metering: Arc<dyn MeteringClient>,
        product_code: &'static str,
        public_key_version: i32,
        signature_key: &'static str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            metering,
            product_code,
            public_key_version,
            signature_key,
            retry,
        }
    }

    /// Make sure `record` holds a metering token for `identity` and return it.
    ///
    /// # Errors
    /// - Metering errors: nothing was obtained, nothing was written.
    /// - `PersistFailed`: a token was obtained (and set on `record`) but could
    ///   not be written. The token is carried in the error.
    pub async fn register(
        &self,
        identity: &str,
        record: &mut EntitlementRecord,
    ) -> Result<String, MeterwardenError> {
        if let Some(token) = record.cached_token(self.signature_key)? {
            tracing::debug!(record = %record.key, "using cached metering token");
            return Ok(token);
        }

        let request = RegisterUsageRequest {
            product_code: self.product_code.to_string(),
            public_key_version: self.public_key_version,
            nonce: identity.to_string(),
        };
        let response = self.metering.register_usage(&request).await?;
        let token = response.signature;

        tracing::info!(record = %record.key, "registered usage with metering service");

        record.set_cached_token(self.signature_key, &token);
        match self.persist(record, &token).await {
            Ok(()) => Ok(token),
            Err(source) => {
                tracing::warn!(
                    record = %record.key,
                    error = %source,
                    "metering token obtained but not persisted"
                );
                Err(MeterwardenError::PersistFailed {
                    token,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Write the token, re-reading and retrying on conflicts only.
    async fn persist(
        &self,
        record: &mut EntitlementRecord,
        token: &str,
    ) -> Result<(), MeterwardenError> {
        let store = &self.store;
        let signature_key = self.signature_key;
        let first = &*record;
        let key = &record.key;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let stored = (|| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return store.apply_record(first).await;
            }
            // Someone else wrote the record; apply the token on top of their version.
            let mut latest = store.get_record(key).await?;
            latest.set_cached_token(signature_key, token);
            store.apply_record(&latest).await
        })
        .retry(self.retry.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &MeterwardenError| e.is_conflict())
        .notify(|e: &MeterwardenError, delay: Duration| {
            tracing::warn!(
                record = %key,
                attempt = attempts.load(Ordering::SeqCst),
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "conflict writing entitlement record, retrying"
            );
        })
        .await?;

        *record = stored;
        Ok(())
    }
}
