//! Trust anchor: the embedded RSA public key that signs metering tokens.

use crate::MeterwardenError;
use jsonwebtoken::DecodingKey;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::RwLock;

/// Public key and version used to verify metering tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustAnchor {
    /// PEM-encoded RSA public key (`BEGIN PUBLIC KEY` or `BEGIN RSA PUBLIC KEY`).
    pub public_key_pem: &'static str,

    /// Version the metering service stamps into `publicKeyVersion`.
    pub version: i32,
}

impl TrustAnchor {
    /// Decode the anchor's public key.
    pub fn decoding_key(&self) -> Result<DecodingKey, MeterwardenError> {
        decode_trust_anchor(self.public_key_pem)
    }
}

/// Cache for decoded verifying keys.
static KEY_CACHE: OnceCell<RwLock<HashMap<&'static str, DecodingKey>>> = OnceCell::new();

/// Decode a PEM-encoded RSA public key.
///
/// The key is cached after first decode.
pub fn decode_trust_anchor(pem: &'static str) -> Result<DecodingKey, MeterwardenError> {
    let cache = KEY_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(guard) = cache.read() {
        if let Some(key) = guard.get(pem) {
            return Ok(key.clone());
        }
    }

    let key = DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| MeterwardenError::ConfigError(format!("Invalid trust anchor PEM: {}", e)))?;

    // Best-effort insert into cache. If locking fails, still return the decoded key.
    if let Ok(mut guard) = cache.write() {
        guard.insert(pem, key.clone());
    }

    Ok(key)
}
