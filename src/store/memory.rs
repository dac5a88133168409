//! In-process record store.

use crate::store::{EntitlementRecord, EntitlementStore, RecordKey};
use crate::MeterwardenError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Record store backed by a map, with a fixed cluster identity.
#[derive(Debug)]
pub struct MemoryStore {
    identity: Option<String>,
    records: RwLock<HashMap<RecordKey, EntitlementRecord>>,
}

impl MemoryStore {
    /// Create an empty store reporting `identity` as the cluster identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store with no cluster identity; identity lookups fail.
    pub fn without_identity() -> Self {
        Self {
            identity: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty record, as done on first deployment.
    pub async fn create_record(&self, key: RecordKey) -> EntitlementRecord {
        let mut record = EntitlementRecord::new(key.clone());
        record.resource_version = 1;
        self.records.write().await.insert(key, record.clone());
        record
    }

    /// Current stored copy of a record.
    pub async fn snapshot(&self, key: &RecordKey) -> Option<EntitlementRecord> {
        self.records.read().await.get(key).cloned()
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn get_record(&self, key: &RecordKey) -> Result<EntitlementRecord, MeterwardenError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| MeterwardenError::RecordRead(format!("{} not found", key)))
    }

    async fn apply_record(
        &self,
        record: &EntitlementRecord,
    ) -> Result<EntitlementRecord, MeterwardenError> {
        let mut records = self.records.write().await;
        let current_version = records
            .get(&record.key)
            .map(|r| r.resource_version)
            .unwrap_or(0);

        if current_version != record.resource_version {
            return Err(MeterwardenError::StoreConflict(format!(
                "{} is at version {}, write was based on {}",
                record.key, current_version, record.resource_version
            )));
        }

        let mut stored = record.clone();
        stored.resource_version = current_version + 1;
        records.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn cluster_identity(&self) -> Result<String, MeterwardenError> {
        self.identity
            .clone()
            .ok_or_else(|| MeterwardenError::IdentityRead("no cluster identity".to_string()))
    }
}
