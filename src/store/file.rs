//! File-based record store with atomic writes.
//!
//! Stores records under `dirs::data_dir()/<root>/<namespace>/<name>.json`.
//! Uses temp file + rename for atomic writes. The cluster identity is read
//! from `<root>/cluster-identity`.

use crate::store::{EntitlementRecord, EntitlementStore, RecordKey};
use crate::MeterwardenError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Name of the file holding the cluster identity.
pub const IDENTITY_FILE: &str = "cluster-identity";

/// File-based record store.
#[derive(Debug)]
pub struct FileStore {
    /// Root directory.
    root: PathBuf,
    /// Serializes compare-and-write within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `dirs::data_dir()/<namespace>/`.
    pub fn new(namespace: &str) -> Result<Self, MeterwardenError> {
        let base_dir = dirs::data_dir().ok_or_else(|| {
            MeterwardenError::ConfigError("Could not find data directory".to_string())
        })?;
        Ok(Self::with_path(base_dir.join(namespace)))
    }

    /// Create a store at a specific path.
    pub fn with_path(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the directory and path for a record file.
    ///
    /// Both key parts must be a single plain path component so a record can
    /// never resolve outside `root`.
    fn record_path(&self, key: &RecordKey) -> Result<(PathBuf, PathBuf), String> {
        for part in [&key.namespace, &key.name] {
            if !is_plain_component(part) {
                return Err(format!("invalid record key {}: {:?} is not a plain name", key, part));
            }
        }
        let dir = self.root.join(&key.namespace);
        let path = dir.join(format!("{}.json", key.name));
        Ok((dir, path))
    }

    /// Create an empty record if none exists yet, as done on first deployment.
    pub async fn create_record(&self, key: RecordKey) -> Result<EntitlementRecord, MeterwardenError> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.load(&key).await? {
            return Ok(existing);
        }
        let mut record = EntitlementRecord::new(key);
        record.resource_version = 1;
        self.save(&record).await?;
        Ok(record)
    }

    /// Record the cluster identity.
    pub async fn set_cluster_identity(&self, identity: &str) -> Result<(), MeterwardenError> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            MeterwardenError::StoreWrite(format!("Failed to create store dir: {}", e))
        })?;
        fs::write(self.root.join(IDENTITY_FILE), identity)
            .await
            .map_err(|e| MeterwardenError::StoreWrite(format!("Failed to write identity: {}", e)))
    }

    async fn load(&self, key: &RecordKey) -> Result<Option<EntitlementRecord>, MeterwardenError> {
        let (_, path) = self.record_path(key).map_err(MeterwardenError::RecordRead)?;
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MeterwardenError::RecordRead(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: EntitlementRecord = serde_json::from_str(&json).map_err(|e| {
            MeterwardenError::RecordRead(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(record))
    }

    /// Save a record atomically.
    async fn save(&self, record: &EntitlementRecord) -> Result<(), MeterwardenError> {
        let (dir, target_path) = self
            .record_path(&record.key)
            .map_err(MeterwardenError::StoreWrite)?;
        let temp_path = dir.join(format!("{}.tmp", record.key.name));

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MeterwardenError::StoreWrite(format!("Failed to create dir: {}", e)))?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| MeterwardenError::StoreWrite(format!("Failed to serialize: {}", e)))?;

        fs::write(&temp_path, &json)
            .await
            .map_err(|e| MeterwardenError::StoreWrite(format!("Failed to write temp file: {}", e)))?;

        fs::rename(&temp_path, &target_path).await.map_err(|e| {
            MeterwardenError::StoreWrite(format!("Failed to rename record file: {}", e))
        })?;

        Ok(())
    }
}

fn is_plain_component(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\', '\0'])
}

#[async_trait]
impl EntitlementStore for FileStore {
    async fn get_record(&self, key: &RecordKey) -> Result<EntitlementRecord, MeterwardenError> {
        self.load(key)
            .await?
            .ok_or_else(|| MeterwardenError::RecordRead(format!("{} not found", key)))
    }

    async fn apply_record(
        &self,
        record: &EntitlementRecord,
    ) -> Result<EntitlementRecord, MeterwardenError> {
        self.record_path(&record.key)
            .map_err(MeterwardenError::StoreWrite)?;
        let _guard = self.write_lock.lock().await;

        let current_version = self
            .load(&record.key)
            .await?
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
        self.save(&stored).await?;
        Ok(stored)
    }

    async fn cluster_identity(&self) -> Result<String, MeterwardenError> {
        let path = self.root.join(IDENTITY_FILE);
        let identity = fs::read_to_string(&path).await.map_err(|e| {
            MeterwardenError::IdentityRead(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let identity = identity.trim();
        if identity.is_empty() {
            return Err(MeterwardenError::IdentityRead(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(identity.to_string())
    }
}
