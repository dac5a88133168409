//! AWS Marketplace Metering `RegisterUsage` request and response structs.

use serde::{Deserialize, Serialize};

/// `RegisterUsage` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterUsageRequest {
    /// Marketplace product code.
    pub product_code: String,
    /// Version of the public key the caller will verify with.
    pub public_key_version: i32,
    /// Caller-chosen nonce echoed into the signed token.
    pub nonce: String,
}

/// `RegisterUsage` response body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterUsageResponse {
    /// Signed token (JWS) confirming the registration.
    pub signature: String,

    /// When the signing key is due to rotate (epoch seconds).
    #[serde(default)]
    pub public_key_rotation_timestamp: Option<f64>,
}
