//! Entitlement reconcile loop.
//!
//! One cycle reads the entitlement record and the cluster identity, makes
//! sure a metering token is registered, and verifies it:
//!
//! ```text
//! Start ──fetch──▶ Registering ──▶ Verifying ──▶ Confirmed
//!   │                  │               ├──────▶ Unconfirmed (recheck after sync period)
//!   └──────────────────┴───────────────┴──────▶ Failed (error returned to the scheduler)
//! ```
//!
//! The host scheduler (watch + periodic resync) calls [`Reconcile::reconcile`]
//! and owns backoff for failed cycles. Nothing here retries a whole cycle.

use crate::client::http::MeteringClient;
use crate::config::EntitlementConfig;
use crate::crypto::verify::{SignatureVerifier, Verification};
use crate::registrar::Registrar;
use crate::store::{EntitlementStore, RecordKey};
use crate::MeterwardenError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// A request to reconcile the entitlement record in one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Namespace holding the entitlement record.
    pub namespace: String,
}

impl ReconcileRequest {
    /// Create a request for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

/// Successful end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The token is authentic and issued for this cluster.
    Confirmed,
    /// The token failed the signature check; look again later.
    Unconfirmed {
        /// When to recheck.
        recheck_after: Duration,
    },
}

impl Outcome {
    /// Explicit requeue delay, if the scheduler should run another cycle on its own.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Outcome::Confirmed => None,
            Outcome::Unconfirmed { recheck_after } => Some(*recheck_after),
        }
    }

    /// Whether the entitlement was confirmed.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed)
    }
}

/// Interface the host scheduler drives cycles through.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Run one cycle.
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<Outcome, MeterwardenError>;
}

/// Reconciles the entitlement record.
pub struct Reconciler {
    config: EntitlementConfig,
    store: Arc<dyn EntitlementStore>,
    registrar: Registrar,
    verifier: SignatureVerifier,
}

impl Reconciler {
    /// Create a reconciler.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration or trust anchor is invalid.
    pub fn new(
        config: EntitlementConfig,
        store: Arc<dyn EntitlementStore>,
        metering: Arc<dyn MeteringClient>,
    ) -> Result<Self, MeterwardenError> {
        config.validate()?;
        let verifier = SignatureVerifier::new(config.product_code, &config.trust_anchor)?;
        let registrar = Registrar::new(
            store.clone(),
            metering,
            config.product_code,
            config.trust_anchor.version,
            config.signature_key,
            config.persist_retry,
        );

        Ok(Self {
            config,
            store,
            registrar,
            verifier,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }

    async fn run_cycle(&self, key: &RecordKey) -> Result<Outcome, MeterwardenError> {
        let mut record = self.store.get_record(key).await?;
        let identity = self.store.cluster_identity().await?;

        let token = self.registrar.register(&identity, &mut record).await?;

        match self.verifier.verify(&token, &identity)? {
            Verification::Valid => {
                tracing::info!("entitlement has been confirmed");
                Ok(Outcome::Confirmed)
            }
            Verification::CryptoInvalid => {
                tracing::info!(
                    recheck_after_secs = self.config.sync_period.as_secs(),
                    "entitlement signature is not valid"
                );
                Ok(Outcome::Unconfirmed {
                    recheck_after: self.config.sync_period,
                })
            }
            Verification::ClaimMismatch(mismatch) => Err(MeterwardenError::ClaimMismatch(mismatch)),
        }
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<Outcome, MeterwardenError> {
        let key = RecordKey::new(request.namespace.clone(), self.config.record_name);
        let span = tracing::info_span!("reconcile", record = %key);

        async {
            tracing::debug!("reconciling");
            let timeout = self.config.reconcile_timeout;
            match tokio::time::timeout(timeout, self.run_cycle(&key)).await {
                Ok(result) => result,
                Err(_) => Err(MeterwardenError::Timeout(timeout)),
            }
        }
        .instrument(span)
        .await
    }
}
