//! Meterwarden error types.

use crate::crypto::claims::ClaimMismatch;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while registering or verifying an entitlement.
#[derive(Debug, Error)]
pub enum MeterwardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The entitlement record could not be read.
    #[error("Cannot get entitlement record: {0}")]
    RecordRead(String),

    /// The cluster identity could not be read.
    #[error("Cannot get cluster identity: {0}")]
    IdentityRead(String),

    /// The record changed underneath us (optimistic concurrency conflict).
    #[error("Entitlement record conflict: {0}")]
    StoreConflict(String),

    /// The record could not be written.
    #[error("Cannot write entitlement record: {0}")]
    StoreWrite(String),

    /// Transport error talking to the metering service.
    #[error("Metering transport error: {0}")]
    MeteringTransport(String),

    /// The metering service rejected the registration.
    #[error("Cannot register usage: {code} (HTTP {status}): {message}")]
    MeteringApi {
        /// HTTP status code.
        status: u16,
        /// Service error code (e.g. `CustomerNotEntitledException`).
        code: String,
        /// Service error message.
        message: String,
    },

    /// Metering credentials are missing or unusable.
    #[error("Metering credentials error: {0}")]
    Credentials(String),

    /// The metering response could not be decoded.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A token was obtained but could not be persisted.
    ///
    /// The token is kept so the caller can still see what the metering
    /// service returned.
    #[error("Cannot apply entitlement record: {source}")]
    PersistFailed {
        /// Token returned by the metering service.
        token: String,
        /// Underlying store error.
        #[source]
        source: Box<MeterwardenError>,
    },

    /// The signed token is malformed.
    #[error("Cannot parse token: {0}")]
    TokenParse(String),

    /// The token is authentic but carries unexpected claims.
    #[error("Claim mismatch: {0}")]
    ClaimMismatch(ClaimMismatch),

    /// The reconcile cycle ran out of time.
    #[error("Reconcile timed out after {0:?}")]
    Timeout(Duration),
}

impl MeterwardenError {
    /// Whether this is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MeterwardenError::StoreConflict(_))
    }

    /// The token obtained from the metering service, if this error carries one.
    pub fn obtained_token(&self) -> Option<&str> {
        match self {
            MeterwardenError::PersistFailed { token, .. } => Some(token),
            _ => None,
        }
    }
}
