//! Expected-claim checks for metering tokens.

use serde_json::{Map, Value};
use std::fmt;

/// Claims checked on an authentic metering token, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// `productCode`
    ProductCode,
    /// `nonce`
    Nonce,
    /// `publicKeyVersion`
    PublicKeyVersion,
}

impl Claim {
    /// Name of the claim in the token payload.
    pub fn name(&self) -> &'static str {
        match self {
            Claim::ProductCode => "productCode",
            Claim::Nonce => "nonce",
            Claim::PublicKeyVersion => "publicKeyVersion",
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An authentic token whose claim differs from what we expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMismatch {
    /// Which claim failed.
    pub claim: Claim,
    /// Value we expected.
    pub expected: String,
    /// Value found in the token (`<absent>` when missing).
    pub actual: String,
}

impl fmt::Display for ClaimMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} does not match expected {}",
            self.claim, self.actual, self.expected
        )
    }
}

/// Values the token must carry.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedClaims<'a> {
    /// Marketplace product code.
    pub product_code: &'a str,
    /// Cluster identity the token was issued for.
    pub nonce: &'a str,
    /// Trust anchor version.
    pub public_key_version: i32,
}

impl ExpectedClaims<'_> {
    /// Check claims in order and report the first mismatch.
    pub fn check(&self, claims: &Map<String, Value>) -> Result<(), ClaimMismatch> {
        let product_code = claims.get(Claim::ProductCode.name());
        if product_code.and_then(Value::as_str) != Some(self.product_code) {
            return Err(mismatch(Claim::ProductCode, self.product_code, product_code));
        }

        let nonce = claims.get(Claim::Nonce.name());
        if nonce.and_then(Value::as_str) != Some(self.nonce) {
            return Err(mismatch(Claim::Nonce, self.nonce, nonce));
        }

        // JSON numbers compare as floats, so 1 and 1.0 are the same version.
        let version = claims.get(Claim::PublicKeyVersion.name());
        if version.and_then(Value::as_f64) != Some(f64::from(self.public_key_version)) {
            return Err(mismatch(
                Claim::PublicKeyVersion,
                &self.public_key_version.to_string(),
                version,
            ));
        }

        Ok(())
    }
}

fn mismatch(claim: Claim, expected: &str, actual: Option<&Value>) -> ClaimMismatch {
    ClaimMismatch {
        claim,
        expected: expected.to_string(),
        actual: render(claim, actual),
    }
}

/// String claims print bare; the version keeps its JSON form so `"1"` and `1` differ.
fn render(claim: Claim, value: Option<&Value>) -> String {
    match (claim, value) {
        (_, None) => "<absent>".to_string(),
        (Claim::ProductCode | Claim::Nonce, Some(Value::String(s))) => s.clone(),
        (_, Some(other)) => other.to_string(),
    }
}
