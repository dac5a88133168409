//! Metering token verification.
//!
//! A token can end up in exactly one of four places:
//! - malformed: `Err(TokenParse)`
//! - signature does not check out against the trust anchor: [`Verification::CryptoInvalid`]
//! - authentic but carrying the wrong claims: [`Verification::ClaimMismatch`]
//! - authentic with the expected claims: [`Verification::Valid`]
//!
//! `CryptoInvalid` is not an error. It may mean the anchor is stale, so callers
//! recheck later instead of failing loudly. A claim mismatch on an authentic
//! token points at tampering or a bug and is reported as such.

use crate::crypto::anchor::TrustAnchor;
use crate::crypto::claims::{ClaimMismatch, ExpectedClaims};
use crate::MeterwardenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

/// RSA-family algorithms the trust anchor can check.
const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Result of verifying a well-formed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Authentic and carrying the expected claims.
    Valid,
    /// Not signed by the trust anchor.
    CryptoInvalid,
    /// Authentic, but a claim differs from the expected value.
    ClaimMismatch(ClaimMismatch),
}

impl Verification {
    /// Whether the token was confirmed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Verifies metering tokens against a trust anchor and product code.
#[derive(Clone)]
pub struct SignatureVerifier {
    product_code: &'static str,
    key_version: i32,
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("product_code", &self.product_code)
            .field("key_version", &self.key_version)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Create a verifier for the given product and trust anchor.
    pub fn new(product_code: &'static str, anchor: &TrustAnchor) -> Result<Self, MeterwardenError> {
        let key = anchor.decoding_key()?;

        // Metering tokens carry no registered claims; only the signature and
        // our own claims matter.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = RSA_ALGORITHMS.to_vec();
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Ok(Self {
            product_code,
            key_version: anchor.version,
            key,
            validation,
        })
    }

    /// Verify `token` was issued for `identity`.
    ///
    /// Pure: the same token and identity always give the same answer.
    pub fn verify(&self, token: &str, identity: &str) -> Result<Verification, MeterwardenError> {
        // The signature check runs over the raw segments, so a payload that
        // is not a JSON object would otherwise surface as a bad signature.
        parse_claims(token)?;

        let data = match decode::<Map<String, Value>>(token, &self.key, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                return match e.kind() {
                    ErrorKind::InvalidSignature => Ok(Verification::CryptoInvalid),
                    _ => Err(MeterwardenError::TokenParse(e.to_string())),
                }
            }
        };

        let expected = ExpectedClaims {
            product_code: self.product_code,
            nonce: identity,
            public_key_version: self.key_version,
        };

        match expected.check(&data.claims) {
            Ok(()) => Ok(Verification::Valid),
            Err(mismatch) => Ok(Verification::ClaimMismatch(mismatch)),
        }
    }
}

/// Decode the header and claims segments without checking the signature.
fn parse_claims(token: &str) -> Result<Map<String, Value>, MeterwardenError> {
    decode_header(token).map_err(|e| MeterwardenError::TokenParse(e.to_string()))?;

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| MeterwardenError::TokenParse("missing payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| MeterwardenError::TokenParse(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| MeterwardenError::TokenParse(format!("payload is not a JSON object: {}", e)))
}
