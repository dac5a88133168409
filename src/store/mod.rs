//! Entitlement record storage.
//!
//! The store is the one shared mutable resource. Records are read once per
//! cycle and written with optimistic concurrency: a write carries the
//! `resource_version` it was read at and fails with
//! [`MeterwardenError::StoreConflict`] if someone else got there first.

pub mod file;
pub mod memory;

use crate::MeterwardenError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Namespace and name of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Namespace the record lives in.
    pub namespace: String,
    /// Record name.
    pub name: String,
}

impl RecordKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Key/value container holding the cached metering token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Where the record lives.
    pub key: RecordKey,

    /// Raw values, base64-encoded on disk like a Kubernetes `Secret`.
    #[serde(default, with = "base64_map")]
    pub data: BTreeMap<String, Vec<u8>>,

    /// Version the record was read at. Zero means never stored.
    #[serde(default)]
    pub resource_version: u64,
}

impl EntitlementRecord {
    /// Create an empty, never-stored record.
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            data: BTreeMap::new(),
            resource_version: 0,
        }
    }

    /// The cached token under `data_key`, if present and non-empty.
    ///
    /// # Errors
    /// Returns `TokenParse` if the stored bytes are not UTF-8.
    pub fn cached_token(&self, data_key: &str) -> Result<Option<String>, MeterwardenError> {
        match self.data.get(data_key).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.clone()).map(Some).map_err(|e| {
                MeterwardenError::TokenParse(format!(
                    "{} value in {} is not UTF-8: {}",
                    data_key, self.key, e
                ))
            }),
        }
    }

    /// Store `token` under `data_key`.
    pub fn set_cached_token(&mut self, data_key: &str, token: &str) {
        self.data
            .insert(data_key.to_string(), token.as_bytes().to_vec());
    }
}

/// Access to entitlement records and the cluster identity.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Read a record. A missing record is a [`MeterwardenError::RecordRead`] error.
    async fn get_record(&self, key: &RecordKey) -> Result<EntitlementRecord, MeterwardenError>;

    /// Write a record if its `resource_version` is still current.
    ///
    /// Returns the stored record with its new version.
    async fn apply_record(
        &self,
        record: &EntitlementRecord,
    ) -> Result<EntitlementRecord, MeterwardenError>;

    /// Immutable identifier of the cluster this process runs in.
    async fn cluster_identity(&self) -> Result<String, MeterwardenError>;
}

mod base64_map {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        data: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = data
            .iter()
            .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(&v)
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| D::Error::custom(format!("key {}: {}", k, e)))
            })
            .collect()
    }
}
