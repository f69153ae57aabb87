//! Key-value store contract and the in-memory backend.
//!
//! The contract is deliberately small: versioned reads, compare-and-set,
//! TTL writes, and prefix scans. The coordination core performs every
//! state transition through [`KvStore::compare_and_set`], so per-key
//! atomicity in the backend is enough to linearize transitions across
//! processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

use crate::error::StoreResult;

/// A versioned value read from a store.
///
/// The version is per-key and strictly monotonic, including across TTL
/// expiry, so a stale writer can never pass a compare-and-set with an old
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The stored bytes.
    pub value: Vec<u8>,
    /// The version of this value.
    pub version: u64,
}

/// Minimal key-value contract consumed by the coordination core.
///
/// Implementations must treat an expired entry as absent on `get` and
/// `scan_prefix`, and must treat `expected_version = None` in
/// [`compare_and_set`](KvStore::compare_and_set) as "the key must be
/// absent" (a create).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. Returns `None` for missing or expired entries.
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>>;

    /// Atomically replace a key's value if its current version matches.
    ///
    /// `expected_version = None` succeeds only if the key is absent.
    /// Returns `false` (without writing) on a version mismatch; the caller
    /// is expected to re-read and retry.
    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Write a key unconditionally, with an optional TTL.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// List all live entries whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Cheap health probe, used by the degradation chain before
    /// re-promoting a tier.
    async fn ping(&self) -> StoreResult<()>;
}

/// Convert an optional TTL into an absolute expiry timestamp.
///
/// Out-of-range TTLs saturate to "never expires" rather than panicking.
fn expiry_from(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = ttl?;
    let delta = chrono::Duration::from_std(ttl).ok()?;
    Utc::now().checked_add_signed(delta)
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local key-value store.
///
/// The terminal degradation tier: always available, never durable. Backs
/// the coordination core when every shared tier is unhealthy, and backs
/// tests directly.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        let now = Utc::now();
        match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now) => Ok(Some(KvEntry {
                value: stored.value.clone(),
                version: stored.version,
            })),
            _ => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let expires_at = expiry_from(ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = !occupied.get().is_expired(now);
                let matches = if live {
                    expected_version == Some(occupied.get().version)
                } else {
                    // Expired entries read as absent, but the version
                    // keeps advancing so stale writers cannot win.
                    expected_version.is_none()
                };
                if !matches {
                    return Ok(false);
                }
                let next_version = occupied.get().version.saturating_add(1);
                occupied.insert(StoredValue {
                    value: value.to_vec(),
                    version: next_version,
                    expires_at,
                });
                Ok(true)
            },
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    return Ok(false);
                }
                vacant.insert(StoredValue {
                    value: value.to_vec(),
                    version: 1,
                    expires_at,
                });
                Ok(true)
            },
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = expiry_from(ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next_version = occupied.get().version.saturating_add(1);
                occupied.insert(StoredValue {
                    value: value.to_vec(),
                    version: next_version,
                    expires_at,
                });
            },
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    value: value.to_vec(),
                    version: 1,
                    expires_at,
                });
            },
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        let now = Utc::now();
        let mut results: Vec<(String, KvEntry)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.is_expired(now))
            .map(|e| {
                (
                    e.key().clone(),
                    KvEntry {
                        value: e.value.clone(),
                        version: e.version,
                    },
                )
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryKvStore::new();
        assert!(store.compare_and_set("k", None, b"v1", None).await.unwrap());
        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v1");
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_create_fails_when_present() {
        let store = MemoryKvStore::new();
        assert!(store.compare_and_set("k", None, b"v1", None).await.unwrap());
        assert!(!store.compare_and_set("k", None, b"v2", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().value, b"v1");
    }

    #[tokio::test]
    async fn test_cas_version_match_and_mismatch() {
        let store = MemoryKvStore::new();
        store.compare_and_set("k", None, b"v1", None).await.unwrap();

        // Stale version loses.
        assert!(!store.compare_and_set("k", Some(9), b"bad", None).await.unwrap());
        // Correct version wins and bumps the version.
        assert!(store.compare_and_set("k", Some(1), b"v2", None).await.unwrap());
        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v2");
        assert_eq!(entry.version, 2);
        // The old version can no longer write.
        assert!(!store.compare_and_set("k", Some(1), b"v3", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry_reads_as_absent() {
        let store = MemoryKvStore::new();
        store
            .set_with_ttl("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan_prefix("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_survives_expiry() {
        let store = MemoryKvStore::new();
        store
            .compare_and_set("k", None, b"v1", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Expired key is recreated as absent...
        assert!(store.compare_and_set("k", None, b"v2", None).await.unwrap());
        // ...but the version did not restart from 1.
        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryKvStore::new();
        store.set_with_ttl("a/1", b"1", None).await.unwrap();
        store.set_with_ttl("a/2", b"2", None).await.unwrap();
        store.set_with_ttl("b/1", b"3", None).await.unwrap();

        let results = store.scan_prefix("a/").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a/1");
        assert_eq!(results[1].0, "a/2");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryKvStore::new();
        store.set_with_ttl("k", b"v", None).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        // Deleting again is fine.
        store.delete("k").await.unwrap();
    }
}
