//! Durable client-side storage for the cart.
//!
//! The cart is stored as one versioned JSON record:
//!
//! ```json
//! { "version": 1, "items": [ ... ] }
//! ```
//!
//! A record with an unknown version, or one that no longer parses, is
//! discarded with a warning so the cart hydrates empty instead of failing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stride_core::CartItem;
use thiserror::Error;
use tracing::{debug, warn};

/// Current layout version of the stored record.
pub const STORAGE_VERSION: u32 = 1;

/// Errors from durable cart storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the record failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The stored record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCart {
    version: u32,
    items: Vec<CartItem>,
}

/// Only the version, read first so a future layout is not parsed as this one.
#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Durable storage for the local cart.
#[async_trait]
pub trait CartStorage: Send + Sync {
    /// Load the stored items.
    ///
    /// Returns `Ok(None)` when nothing usable is stored.
    async fn load(&self) -> Result<Option<Vec<CartItem>>, StorageError>;

    /// Replace the stored items.
    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError>;
}

/// Decode a stored record, discarding unknown versions and corrupt data.
fn decode(raw: &str) -> Option<Vec<CartItem>> {
    let probe: VersionProbe = match serde_json::from_str(raw) {
        Ok(probe) => probe,
        Err(e) => {
            warn!(error = %e, "Discarding unreadable cart record");
            return None;
        }
    };

    if probe.version != STORAGE_VERSION {
        warn!(
            found = probe.version,
            expected = STORAGE_VERSION,
            "Discarding cart record with unknown version"
        );
        return None;
    }

    match serde_json::from_str::<StoredCart>(raw) {
        Ok(stored) => Some(stored.items),
        Err(e) => {
            warn!(error = %e, "Discarding corrupt cart record");
            None
        }
    }
}

fn encode(items: &[CartItem]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(&StoredCart {
        version: STORAGE_VERSION,
        items: items.to_vec(),
    })?)
}

// =============================================================================
// File storage
// =============================================================================

/// Cart record stored in a JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the record, so a
/// crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileCartStorage {
    path: PathBuf,
}

impl FileCartStorage {
    /// Storage backed by the file at `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CartStorage for FileCartStorage {
    async fn load(&self) -> Result<Option<Vec<CartItem>>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(decode(&raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored cart");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        let raw = encode(items)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, raw).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

// =============================================================================
// Memory storage
// =============================================================================

/// Cart record held in memory, for tests and storage-less embeddings.
///
/// Keeps the encoded record so versioning behaves exactly like the file store.
#[derive(Debug, Default)]
pub struct MemoryCartStorage {
    record: Mutex<Option<String>>,
}

impl MemoryCartStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with a raw record.
    #[must_use]
    pub fn with_record(raw: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(raw.into())),
        }
    }

    /// The raw stored record, if any.
    #[must_use]
    pub fn record(&self) -> Option<String> {
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CartStorage for MemoryCartStorage {
    async fn load(&self) -> Result<Option<Vec<CartItem>>, StorageError> {
        Ok(self.record().as_deref().and_then(decode))
    }

    async fn save(&self, items: &[CartItem]) -> Result<(), StorageError> {
        let raw = encode(items)?;
        *self
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(raw);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use stride_core::{CartItemKey, CurrencyCode, Price, VariantId};

    use super::*;

    fn item() -> CartItem {
        CartItem {
            key: CartItemKey::new(VariantId::new(5), "8", "White"),
            name: "Court Classic".to_string(),
            unit_price: Price::from_cents(6500, CurrencyCode::USD),
            quantity: 1,
            image: None,
        }
    }

    #[tokio::test]
    async fn test_file_storage_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCartStorage::new(dir.path().join("cart.json"));
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCartStorage::new(dir.path().join("nested/state/cart.json"));
        storage.save(&[item()]).await.unwrap();

        let raw = std::fs::read_to_string(storage.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["version"], STORAGE_VERSION);
        assert_eq!(storage.load().await.unwrap(), Some(vec![item()]));
        assert!(!storage.temp_path().exists());
    }

    #[tokio::test]
    async fn test_unknown_version_is_discarded() {
        let storage = MemoryCartStorage::with_record(r#"{"version":2,"lines":[]}"#);
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FileCartStorage::new(path).load().await.unwrap().is_none());

        let storage = MemoryCartStorage::with_record(r#"{"version":1,"items":[{"bogus":true}]}"#);
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_saves_versioned_record() {
        let storage = MemoryCartStorage::new();
        storage.save(&[item()]).await.unwrap();
        assert!(storage.record().unwrap().starts_with("{\"version\":1"));
        assert_eq!(storage.load().await.unwrap(), Some(vec![item()]));
    }
}
