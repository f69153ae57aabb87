//! Sled-backed durable store tier.
//!
//! An embedded store that survives process restarts and exposes a native
//! compare-and-swap, which this backend uses to implement the versioned
//! [`KvStore::compare_and_set`] without read-modify-write races. Records
//! carry their version and absolute expiry inline; expiry is lazy, an
//! expired record reads as absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvEntry, KvStore};

/// On-disk record layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    version: u64,
    expires_at: Option<DateTime<Utc>>,
    value: Vec<u8>,
}

impl DiskEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn encode(entry: &DiskEntry) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> StoreResult<DiskEntry> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn expiry_from(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = ttl?;
    let delta = chrono::Duration::from_std(ttl).ok()?;
    Utc::now().checked_add_signed(delta)
}

/// Durable key-value store backed by an embedded sled database.
#[derive(Debug, Clone)]
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be
    /// opened, e.g. the path is locked by another process.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a temporary store that is discarded on drop (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be
    /// created.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        let now = Utc::now();
        let Some(raw) = self
            .db
            .get(key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        let entry = decode(&raw)?;
        if entry.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(KvEntry {
            value: entry.value,
            version: entry.version,
        }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let expires_at = expiry_from(ttl);
        loop {
            let now = Utc::now();
            let current = self
                .db
                .get(key)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let current_entry = match &current {
                Some(raw) => Some(decode(raw)?),
                None => None,
            };

            let (matches, next_version) = match &current_entry {
                Some(entry) if !entry.is_expired(now) => (
                    expected_version == Some(entry.version),
                    entry.version.saturating_add(1),
                ),
                // Expired reads as absent; version keeps advancing.
                Some(entry) => (expected_version.is_none(), entry.version.saturating_add(1)),
                None => (expected_version.is_none(), 1),
            };
            if !matches {
                return Ok(false);
            }

            let new_bytes = encode(&DiskEntry {
                version: next_version,
                expires_at,
                value: value.to_vec(),
            })?;
            let swap = self
                .db
                .compare_and_swap(
                    key,
                    current.as_ref().map(AsRef::<[u8]>::as_ref),
                    Some(new_bytes),
                )
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            match swap {
                Ok(()) => return Ok(true),
                // Lost a physical race; re-read and re-check expectations.
                Err(_) => continue,
            }
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = expiry_from(ttl);
        self.db
            .update_and_fetch(key, |old| {
                let next_version = old
                    .and_then(|raw| decode(raw).ok())
                    .map_or(1, |e| e.version.saturating_add(1));
                encode(&DiskEntry {
                    version: next_version,
                    expires_at,
                    value: value.to_vec(),
                })
                .ok()
            })
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        let now = Utc::now();
        let mut results = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, raw) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let entry = decode(&raw)?;
            if entry.is_expired(now) {
                continue;
            }
            results.push((
                String::from_utf8_lossy(&key).into_owned(),
                KvEntry {
                    value: entry.value,
                    version: entry.version,
                },
            ));
        }
        Ok(results)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.db
            .remove(key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .contains_key("__vigil_ping__")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_create_and_update() {
        let store = SledKvStore::open_temporary().unwrap();
        assert!(store.compare_and_set("k", None, b"v1", None).await.unwrap());
        assert!(!store.compare_and_set("k", None, b"v2", None).await.unwrap());
        assert!(store.compare_and_set("k", Some(1), b"v2", None).await.unwrap());

        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v2");
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn test_ttl_reads_as_absent() {
        let store = SledKvStore::open_temporary().unwrap();
        store
            .set_with_ttl("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledKvStore::open(dir.path()).unwrap();
            store.set_with_ttl("k", b"v", None).await.unwrap();
        }
        let store = SledKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().value, b"v");
    }

    #[tokio::test]
    async fn test_scan_prefix_and_delete() {
        let store = SledKvStore::open_temporary().unwrap();
        store.set_with_ttl("p/a", b"1", None).await.unwrap();
        store.set_with_ttl("p/b", b"2", None).await.unwrap();
        store.set_with_ttl("q/c", b"3", None).await.unwrap();

        let results = store.scan_prefix("p/").await.unwrap();
        assert_eq!(results.len(), 2);

        store.delete("p/a").await.unwrap();
        assert_eq!(store.scan_prefix("p/").await.unwrap().len(), 1);
    }
}
