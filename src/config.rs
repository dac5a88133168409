//! Meterwarden configuration and build-time constants.

use crate::crypto::anchor::{decode_trust_anchor, TrustAnchor};
use crate::retry::RetryPolicy;
use crate::MeterwardenError;
use std::time::Duration;

/// Product code assigned by AWS Marketplace.
pub const MARKETPLACE_PRODUCT_CODE: &str = "1fszvu527waovqeuhpkyx2b5d";

/// AWS Marketplace public key used to verify metering signatures.
pub const MARKETPLACE_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----\nMIIBojANBgkqhkiG9w0BAQEFAAOCAY8AMIIBigKCAYEAyu7Xq7XTBRgFWCL+DXj8\nXyc/fPLWNQ1adPDf8zqkJ1H1JCTg6fUo7HUvNu0BAbPwIME4aDEzteJkhPq9IzS8\nHlrZT/7DqSPV9bXnR9OkqugfbFPyHGyd9afHyfDJfGwfqBP5r8oBuGwmCw5Ia088\nAcePfkVEisAo+8KiBAE16bqvDw0v5YzDrDVpHH9YdK1q9eG5WRTt0h7lYFj8dydr\nh+OyONGyWTkAWbs3JpsQLZgRdU6Klj5aZzO6FeUc2kOz2Hs+QvKgbNSpgV0000KK\n2on4L1+WJau7sj8EFquFdk2C0MhucIy6ceWXGB3YAOb8c0H9FT0eSY5rtX154otW\njmV9vMLLX1gajtQD0iOLBLRQ3WliP7fGc6o3StjMrbKh+ErXGVzzJnjK2eQhgkg/\n/DgcKjUptZ21gdbqbQBGwvfitBEJX7VCwF4VMhFM8JQiAxCVBZ7kkY5ZlGjvN2gO\nAMFKarvAWRwrZisxKWe+RFBU1EI5WS75X7owU/IehIabAgMBAAE=\n-----END PUBLIC KEY-----\n";

/// Version of [`MARKETPLACE_PUBLIC_KEY`].
pub const MARKETPLACE_PUBLIC_KEY_VERSION: i32 = 1;

/// Record key holding the signature returned by the metering service.
pub const SECRET_KEY_AWS_METERING_SIGNATURE: &str = "awsMeteringSignature";

/// Name of the record that stores entitlement tokens.
pub const RECORD_NAME_ENTITLEMENT: &str = "upbound-entitlement";

/// Upper bound for a single reconcile cycle.
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before rechecking a signature that failed verification.
pub const SYNC_PERIOD: Duration = Duration::from_secs(60);

/// Configuration for entitlement registration and verification.
///
/// All values are meant to be compiled in. Nothing here should be read from
/// the environment, otherwise a user could point verification at their own key.
#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    /// Marketplace product code sent on registration and expected in the token.
    pub product_code: &'static str,

    /// Public key (and its version) that signs metering tokens.
    pub trust_anchor: TrustAnchor,

    /// Name of the entitlement record inside the reconciled namespace.
    pub record_name: &'static str,

    /// Key under which the token is cached in the record.
    pub signature_key: &'static str,

    /// Wall-clock bound for one reconcile cycle.
    pub reconcile_timeout: Duration,

    /// Recheck delay after a cryptographically invalid token.
    pub sync_period: Duration,

    /// Retry policy for record writes that hit a conflict.
    pub persist_retry: RetryPolicy,
}

impl EntitlementConfig {
    /// The AWS Marketplace production configuration.
    pub fn marketplace() -> Self {
        Self {
            product_code: MARKETPLACE_PRODUCT_CODE,
            trust_anchor: TrustAnchor {
                public_key_pem: MARKETPLACE_PUBLIC_KEY,
                version: MARKETPLACE_PUBLIC_KEY_VERSION,
            },
            record_name: RECORD_NAME_ENTITLEMENT,
            signature_key: SECRET_KEY_AWS_METERING_SIGNATURE,
            reconcile_timeout: RECONCILE_TIMEOUT,
            sync_period: SYNC_PERIOD,
            persist_retry: RetryPolicy::conflict_default(),
        }
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), MeterwardenError> {
        if self.product_code.is_empty() {
            return Err(MeterwardenError::ConfigError(
                "product_code cannot be empty".to_string(),
            ));
        }
        if self.record_name.is_empty() {
            return Err(MeterwardenError::ConfigError(
                "record_name cannot be empty".to_string(),
            ));
        }
        if self.signature_key.is_empty() {
            return Err(MeterwardenError::ConfigError(
                "signature_key cannot be empty".to_string(),
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(MeterwardenError::ConfigError(
                "reconcile_timeout must be greater than zero".to_string(),
            ));
        }
        if self.persist_retry.max_attempts == 0 {
            return Err(MeterwardenError::ConfigError(
                "persist_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        decode_trust_anchor(self.trust_anchor.public_key_pem)?;
        Ok(())
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self::marketplace()
    }
}
