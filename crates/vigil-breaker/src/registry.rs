//! The circuit breaker registry.
//!
//! One registry instance owns a degradation chain of stores (shared tier
//! first, process-local memory last) and mediates every breaker
//! transition through compare-and-set, so concurrent callers in any
//! number of processes agree on breaker state.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vigil_storage::fallback::{ChainSnapshot, DegradationChain, FallbackKvStore, Tier};
use vigil_storage::kv::{KvStore, MemoryKvStore};

use crate::config::BreakerConfig;
use crate::error::{BreakerError, BreakerResult};
use crate::state::{BreakerRecord, CircuitState};

const KEY_PREFIX: &str = "breaker/";

/// Bound on CAS retries before an operation gives up and answers
/// conservatively. Contention above this level means another caller is
/// making the same transition anyway.
const MAX_CAS_ATTEMPTS: usize = 8;

/// The answer to "may I call this dependency".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the call may proceed.
    pub permit: bool,
    /// The breaker state that produced this decision.
    pub state: CircuitState,
}

/// Read-only breaker view for observability surfaces.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Dependency name.
    pub name: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Failures in the current window.
    pub failure_count: usize,
    /// Successes in the current window.
    pub success_count: usize,
    /// When the breaker last opened.
    pub opened_at: Option<chrono::DateTime<Utc>>,
    /// When a probe was last admitted.
    pub last_probe_at: Option<chrono::DateTime<Utc>>,
}

impl From<&BreakerRecord> for BreakerSnapshot {
    fn from(record: &BreakerRecord) -> Self {
        Self {
            name: record.name.clone(),
            state: record.state,
            failure_count: record.window.failure_count(),
            success_count: record.window.success_count(),
            opened_at: record.opened_at,
            last_probe_at: record.last_probe_at,
        }
    }
}

/// Registry of one breaker state machine per named dependency.
///
/// Breakers are created lazily on first reference and persist until an
/// explicit administrative [`reset`](Self::reset). Store failures degrade
/// to the process-local tier; they never fail or block the caller.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    store: FallbackKvStore,
    chain: Arc<DegradationChain>,
}

impl CircuitBreakerRegistry {
    /// Create a registry backed only by process-local memory.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Configuration`] if the config is invalid.
    pub fn new(config: BreakerConfig) -> BreakerResult<Self> {
        Self::with_tiers(config, Vec::new())
    }

    /// Create a registry backed by a shared store, with memory fallback.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Configuration`] if the config is invalid.
    pub fn with_shared_store(
        config: BreakerConfig,
        store_name: impl Into<String>,
        store: Arc<dyn KvStore>,
    ) -> BreakerResult<Self> {
        Self::with_tiers(config, vec![Tier::new(store_name, store)])
    }

    /// Create a registry over an explicit tier list. A memory tier is
    /// always appended as the terminal fallback.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Configuration`] if the config is invalid.
    pub fn with_tiers(config: BreakerConfig, mut tiers: Vec<Tier>) -> BreakerResult<Self> {
        config.validate()?;
        tiers.push(Tier::new("memory", Arc::new(MemoryKvStore::new())));
        let chain = Arc::new(
            DegradationChain::new("breaker-store", tiers)
                .map_err(|e| BreakerError::Configuration(e.to_string()))?,
        );
        let store =
            FallbackKvStore::new(Arc::clone(&chain)).with_store_timeout(config.store_timeout);
        Ok(Self {
            config,
            store,
            chain,
        })
    }

    fn key(name: &str) -> String {
        format!("{KEY_PREFIX}{name}")
    }

    /// Load a breaker record, creating and persisting a default one on
    /// first reference.
    async fn load_or_create(&self, name: &str) -> (BreakerRecord, Option<u64>) {
        for _ in 0..3 {
            match self.store.get(&Self::key(name)).await {
                Ok(Some(entry)) => match serde_json::from_slice::<BreakerRecord>(&entry.value) {
                    Ok(record) => return (record, Some(entry.version)),
                    Err(e) => {
                        // Corrupt record: overwrite with defaults at the
                        // observed version so the damage self-heals.
                        warn!(breaker = name, error = %e, "corrupt breaker record; resetting");
                        return (
                            BreakerRecord::new(name, self.config.window_size),
                            Some(entry.version),
                        );
                    },
                },
                Ok(None) => {
                    let fresh = BreakerRecord::new(name, self.config.window_size);
                    if self.commit(name, &fresh, None).await {
                        debug!(breaker = name, "breaker created");
                    }
                    // Re-read to pick up the committed version (ours or a
                    // racing creator's).
                },
                Err(e) => {
                    // Unreachable with the terminal memory tier in place.
                    error!(breaker = name, error = %e, "store unavailable on every tier");
                    return (BreakerRecord::new(name, self.config.window_size), None);
                },
            }
        }
        (BreakerRecord::new(name, self.config.window_size), None)
    }

    /// Compare-and-set a record at the expected version.
    async fn commit(&self, name: &str, record: &BreakerRecord, version: Option<u64>) -> bool {
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(breaker = name, error = %e, "failed to encode breaker record");
                return false;
            },
        };
        match self
            .store
            .compare_and_set(&Self::key(name), version, &bytes, None)
            .await
        {
            Ok(swapped) => swapped,
            Err(e) => {
                error!(breaker = name, error = %e, "store unavailable on every tier");
                false
            },
        }
    }

    /// Ask whether a call to `name` may proceed.
    ///
    /// Closed permits, open denies until the recovery timeout elapses,
    /// and the open-to-half-open admission is won by exactly one caller:
    /// the CAS winner becomes the probe, everyone else is denied until
    /// the probe's outcome is reported.
    pub async fn allow(&self, name: &str) -> Decision {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (record, version) = self.load_or_create(name).await;
            match record.state {
                CircuitState::Closed => {
                    return Decision {
                        permit: true,
                        state: CircuitState::Closed,
                    };
                },
                CircuitState::HalfOpen => {
                    return Decision {
                        permit: false,
                        state: CircuitState::HalfOpen,
                    };
                },
                CircuitState::Open => {
                    let now = Utc::now();
                    if !record.recovery_elapsed(&self.config, now) {
                        return Decision {
                            permit: false,
                            state: CircuitState::Open,
                        };
                    }
                    let mut next = record.clone();
                    next.admit_probe(now);
                    if self.commit(name, &next, version).await {
                        info!(breaker = name, "half-open probe admitted");
                        return Decision {
                            permit: true,
                            state: CircuitState::HalfOpen,
                        };
                    }
                    // Lost the admission race; re-read to observe the winner.
                },
            }
        }
        Decision {
            permit: false,
            state: CircuitState::HalfOpen,
        }
    }

    /// Report a successful call to `name`.
    pub async fn record_success(&self, name: &str) {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (record, version) = self.load_or_create(name).await;
            let mut next = record.clone();
            if !next.apply_success() {
                return;
            }
            if self.commit(name, &next, version).await {
                if record.state == CircuitState::HalfOpen {
                    info!(breaker = name, "probe succeeded; breaker closed");
                }
                return;
            }
        }
        warn!(breaker = name, "dropping success outcome after CAS contention");
    }

    /// Report a failed call to `name`.
    pub async fn record_failure(&self, name: &str) {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (record, version) = self.load_or_create(name).await;
            let mut next = record.clone();
            if !next.apply_failure(&self.config, Utc::now()) {
                return;
            }
            if self.commit(name, &next, version).await {
                if next.state == CircuitState::Open && record.state != CircuitState::Open {
                    warn!(
                        breaker = name,
                        failures = next.window.failure_count(),
                        window = next.window.capacity(),
                        "breaker opened"
                    );
                }
                return;
            }
        }
        warn!(breaker = name, "dropping failure outcome after CAS contention");
    }

    /// Read-only state snapshot; creates the breaker lazily if unseen.
    pub async fn get_state(&self, name: &str) -> CircuitState {
        let (record, _) = self.load_or_create(name).await;
        record.state
    }

    /// Administrative reset: force the breaker closed and clear its
    /// window. Audit-logged.
    pub async fn reset(&self, name: &str) {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (record, version) = self.load_or_create(name).await;
            let mut next = record.clone();
            next.reset();
            if self.commit(name, &next, version).await {
                warn!(
                    target: "audit",
                    breaker = name,
                    previous_state = %record.state,
                    "administrative breaker reset"
                );
                return;
            }
        }
        warn!(breaker = name, "reset abandoned after CAS contention");
    }

    /// Snapshots of every known breaker, sorted by name.
    pub async fn list(&self) -> Vec<BreakerSnapshot> {
        let entries = match self.store.scan_prefix(KEY_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "store unavailable on every tier");
                return Vec::new();
            },
        };
        let mut snapshots: Vec<BreakerSnapshot> = entries
            .iter()
            .filter_map(|(key, entry)| {
                match serde_json::from_slice::<BreakerRecord>(&entry.value) {
                    Ok(record) => Some(BreakerSnapshot::from(&record)),
                    Err(e) => {
                        warn!(key, error = %e, "skipping corrupt breaker record");
                        None
                    },
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Probe degraded store tiers and restore the highest healthy one.
    /// Intended to run from a periodic maintenance task.
    pub async fn maintain(&self) {
        self.chain.try_upgrade().await;
    }

    /// Current degradation state of the backing store chain.
    #[must_use]
    pub fn degradation(&self) -> ChainSnapshot {
        self.chain.snapshot()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use vigil_storage::error::{StoreError, StoreResult};
    use vigil_storage::kv::KvEntry;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            recovery_timeout: Duration::from_millis(50),
            ..BreakerConfig::default()
        }
    }

    fn registry(config: BreakerConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(config).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = BreakerConfig {
            failure_threshold_ratio: 2.0,
            ..BreakerConfig::default()
        };
        assert!(CircuitBreakerRegistry::new(config).is_err());
    }

    #[tokio::test]
    async fn test_closed_permits() {
        let registry = registry(BreakerConfig::default());
        let decision = registry.allow("dep").await;
        assert!(decision.permit);
        assert_eq!(decision.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_threshold_trips_and_denies() {
        let registry = registry(BreakerConfig::default());
        for _ in 0..3 {
            registry.record_failure("dep").await;
        }
        // 3 failures in a capacity-5 window crosses the 0.5 ratio.
        assert_eq!(registry.get_state("dep").await, CircuitState::Open);
        let decision = registry.allow("dep").await;
        assert!(!decision.permit);
        assert_eq!(decision.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_successes_keep_breaker_closed() {
        let registry = registry(BreakerConfig::default());
        for _ in 0..2 {
            registry.record_failure("dep").await;
        }
        for _ in 0..10 {
            registry.record_success("dep").await;
        }
        // The ring evicted the failures.
        assert_eq!(registry.get_state("dep").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_get_state_is_idempotent() {
        let registry = registry(BreakerConfig::default());
        for _ in 0..5 {
            assert_eq!(registry.get_state("dep").await, CircuitState::Closed);
        }
        let snapshots = registry.list().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].failure_count, 0);
    }

    #[tokio::test]
    async fn test_single_probe_among_concurrent_callers() {
        let registry = Arc::new(registry(fast_config()));
        for _ in 0..5 {
            registry.record_failure("dep").await;
        }
        assert_eq!(registry.get_state("dep").await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.allow("dep").await }));
        }
        let mut permits = 0;
        for handle in handles {
            let decision = handle.await.unwrap();
            if decision.permit {
                permits += 1;
                assert_eq!(decision.state, CircuitState::HalfOpen);
            }
        }
        assert_eq!(permits, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let registry = registry(fast_config());
        for _ in 0..3 {
            registry.record_failure("dep").await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let probe = registry.allow("dep").await;
        assert!(probe.permit);
        assert_eq!(probe.state, CircuitState::HalfOpen);

        registry.record_success("dep").await;
        let decision = registry.allow("dep").await;
        assert!(decision.permit);
        assert_eq!(decision.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let registry = registry(fast_config());
        for _ in 0..3 {
            registry.record_failure("dep").await;
        }
        let first_opened_at = registry.list().await[0].opened_at.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.allow("dep").await.permit);
        registry.record_failure("dep").await;

        let snapshots = registry.list().await;
        assert_eq!(snapshots[0].state, CircuitState::Open);
        assert!(snapshots[0].opened_at.unwrap() > first_opened_at);

        // Fresh open window: immediately denied again.
        assert!(!registry.allow("dep").await.permit);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let registry = registry(BreakerConfig::default());
        for _ in 0..5 {
            registry.record_failure("dep").await;
        }
        assert_eq!(registry.get_state("dep").await, CircuitState::Open);

        registry.reset("dep").await;
        assert_eq!(registry.get_state("dep").await, CircuitState::Closed);
        let snapshots = registry.list().await;
        assert_eq!(snapshots[0].failure_count, 0);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let registry = registry(BreakerConfig::default());
        for _ in 0..5 {
            registry.record_failure("bad").await;
        }
        assert_eq!(registry.get_state("bad").await, CircuitState::Open);
        assert!(registry.allow("good").await.permit);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_end_to_end_recovery_cycle() {
        let registry = registry(fast_config());

        for _ in 0..5 {
            registry.record_failure("jira-api").await;
        }
        assert_eq!(registry.get_state("jira-api").await, CircuitState::Open);
        assert!(!registry.allow("jira-api").await.permit);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let probe = registry.allow("jira-api").await;
        assert!(probe.permit);
        assert_eq!(probe.state, CircuitState::HalfOpen);

        registry.record_success("jira-api").await;
        let decision = registry.allow("jira-api").await;
        assert!(decision.permit);
        assert_eq!(decision.state, CircuitState::Closed);
    }

    /// A shared store that always fails, to exercise degradation.
    struct DownStore;

    #[async_trait]
    impl vigil_storage::kv::KvStore for DownStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<KvEntry>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn compare_and_set(
            &self,
            _key: &str,
            _expected_version: Option<u64>,
            _value: &[u8],
            _ttl: Option<Duration>,
        ) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &[u8],
            _ttl: Option<Duration>,
        ) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn scan_prefix(&self, _prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_degraded_store_still_enforces() {
        let registry = CircuitBreakerRegistry::with_shared_store(
            BreakerConfig::default(),
            "shared",
            Arc::new(DownStore),
        )
        .unwrap();

        for _ in 0..3 {
            registry.record_failure("dep").await;
        }
        // Breaker logic kept working on the memory tier.
        assert_eq!(registry.get_state("dep").await, CircuitState::Open);
        assert!(!registry.allow("dep").await.permit);
        assert_eq!(registry.degradation().active_tier, 1);
    }
}
