//! Degradation chain: priority-ordered backend fallback per capability.
//!
//! A chain holds an ordered list of [`KvStore`] tiers for one capability
//! (e.g. `"breaker-store"`). The anti-flap rule is asymmetric by design:
//!
//! - **Downgrade is immediate**: the first failure marks a tier unhealthy
//!   and the chain switches to the next tier.
//! - **Upgrade is probed**: a tier is only restored after its cooldown has
//!   elapsed *and* an explicit [`KvStore::ping`] succeeds.
//!
//! The last tier is the terminal fallback (typically [`MemoryKvStore`])
//! and is never marked unhealthy.
//!
//! [`FallbackKvStore`] wraps a chain behind the plain [`KvStore`] trait:
//! every call is bounded by a short timeout, a timed-out or failed call
//! reports the tier unhealthy and retries on the next one, so a degraded
//! backend can never stall or fail the caller.
//!
//! [`MemoryKvStore`]: crate::kv::MemoryKvStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvEntry, KvStore};

/// Default cooldown before an unhealthy tier may be probed again.
pub const DEFAULT_PROBE_COOLDOWN: Duration = Duration::from_secs(30);

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// One backend in a degradation chain.
#[derive(Clone)]
pub struct Tier {
    /// Human-readable tier name (e.g. `"sled"`, `"memory"`).
    pub name: String,
    /// The backend handle.
    pub store: Arc<dyn KvStore>,
}

impl Tier {
    /// Create a tier.
    pub fn new(name: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct TierHealth {
    healthy: bool,
    last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ChainState {
    health: Vec<TierHealth>,
    active_tier: usize,
    last_switch_at: Option<DateTime<Utc>>,
}

/// Read-only view of a chain for observability surfaces.
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    /// The capability this chain serves.
    pub capability: String,
    /// Index of the currently active tier.
    pub active_tier: usize,
    /// Tier names, highest priority first.
    pub tier_names: Vec<String>,
    /// Per-tier health flags.
    pub healthy: Vec<bool>,
    /// When the chain last switched tiers.
    pub last_switch_at: Option<DateTime<Utc>>,
}

/// Priority-ordered fallback chain for one capability.
pub struct DegradationChain {
    capability: String,
    tiers: Vec<Tier>,
    probe_cooldown: Duration,
    probe_timeout: Duration,
    state: Mutex<ChainState>,
}

impl DegradationChain {
    /// Create a chain from a non-empty, priority-ordered tier list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if `tiers` is empty.
    pub fn new(capability: impl Into<String>, tiers: Vec<Tier>) -> StoreResult<Self> {
        let capability = capability.into();
        if tiers.is_empty() {
            return Err(StoreError::Configuration(format!(
                "degradation chain for {capability} has no tiers"
            )));
        }
        let health = tiers
            .iter()
            .map(|_| TierHealth {
                healthy: true,
                last_failure_at: None,
            })
            .collect();
        Ok(Self {
            capability,
            tiers,
            probe_cooldown: DEFAULT_PROBE_COOLDOWN,
            probe_timeout: DEFAULT_STORE_TIMEOUT,
            state: Mutex::new(ChainState {
                health,
                active_tier: 0,
                last_switch_at: None,
            }),
        })
    }

    /// Override the probe cooldown (anti-flap window).
    #[must_use]
    pub fn with_probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.probe_cooldown = cooldown;
        self
    }

    /// Override the health-probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute the active tier after a health change.
    fn recompute(&self, state: &mut ChainState) {
        let terminal = self.tiers.len().saturating_sub(1);
        let next = state
            .health
            .iter()
            .position(|h| h.healthy)
            .unwrap_or(terminal);
        if next != state.active_tier {
            if next > state.active_tier {
                warn!(
                    capability = %self.capability,
                    from = %self.tiers[state.active_tier].name,
                    to = %self.tiers[next].name,
                    "degrading to lower storage tier"
                );
            } else {
                info!(
                    capability = %self.capability,
                    from = %self.tiers[state.active_tier].name,
                    to = %self.tiers[next].name,
                    "restored higher storage tier"
                );
            }
            state.active_tier = next;
            state.last_switch_at = Some(Utc::now());
        }
    }

    /// The capability this chain serves.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Number of tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the chain is empty. Always `false` for a constructed chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// The backend at `tier`, or the terminal tier if out of range.
    #[must_use]
    pub fn store(&self, tier: usize) -> Arc<dyn KvStore> {
        let idx = tier.min(self.tiers.len().saturating_sub(1));
        Arc::clone(&self.tiers[idx].store)
    }

    /// Index of the currently active tier.
    #[must_use]
    pub fn active_tier(&self) -> usize {
        self.lock().active_tier
    }

    /// Resolve the active backend: `(tier_index, store)`.
    #[must_use]
    pub fn resolve(&self) -> (usize, Arc<dyn KvStore>) {
        let tier = self.active_tier();
        (tier, self.store(tier))
    }

    /// Mark a tier unhealthy. Immediate downgrade; the terminal tier is
    /// never marked.
    pub fn report_unhealthy(&self, tier: usize) {
        if tier.saturating_add(1) >= self.tiers.len() {
            debug!(
                capability = %self.capability,
                tier = %self.tiers[self.tiers.len().saturating_sub(1)].name,
                "terminal tier reported unhealthy; ignoring"
            );
            return;
        }
        let mut state = self.lock();
        state.health[tier].healthy = false;
        state.health[tier].last_failure_at = Some(Utc::now());
        self.recompute(&mut state);
    }

    /// Mark a tier healthy after a successful probe.
    pub fn report_healthy(&self, tier: usize) {
        if tier >= self.tiers.len() {
            return;
        }
        let mut state = self.lock();
        state.health[tier].healthy = true;
        state.health[tier].last_failure_at = None;
        self.recompute(&mut state);
    }

    /// Probe unhealthy tiers above the active one and restore the highest
    /// that answers.
    ///
    /// A tier is only probed once its cooldown has elapsed; a failed probe
    /// restarts the cooldown. Returns the active tier after probing.
    pub async fn try_upgrade(&self) -> usize {
        let now = Utc::now();
        let candidates: Vec<usize> = {
            let state = self.lock();
            let cooldown = chrono::Duration::from_std(self.probe_cooldown)
                .unwrap_or_else(|_| chrono::Duration::zero());
            (0..state.active_tier)
                .filter(|&i| {
                    !state.health[i].healthy
                        && state.health[i]
                            .last_failure_at
                            .map_or(true, |at| at + cooldown <= now)
                })
                .collect()
        };

        for tier in candidates {
            let store = self.store(tier);
            match tokio::time::timeout(self.probe_timeout, store.ping()).await {
                Ok(Ok(())) => {
                    self.report_healthy(tier);
                    break;
                },
                Ok(Err(e)) => {
                    debug!(
                        capability = %self.capability,
                        tier = %self.tiers[tier].name,
                        error = %e,
                        "health probe failed"
                    );
                    self.lock().health[tier].last_failure_at = Some(Utc::now());
                },
                Err(_) => {
                    debug!(
                        capability = %self.capability,
                        tier = %self.tiers[tier].name,
                        "health probe timed out"
                    );
                    self.lock().health[tier].last_failure_at = Some(Utc::now());
                },
            }
        }
        self.active_tier()
    }

    /// Snapshot for observability surfaces.
    #[must_use]
    pub fn snapshot(&self) -> ChainSnapshot {
        let state = self.lock();
        ChainSnapshot {
            capability: self.capability.clone(),
            active_tier: state.active_tier,
            tier_names: self.tiers.iter().map(|t| t.name.clone()).collect(),
            healthy: state.health.iter().map(|h| h.healthy).collect(),
            last_switch_at: state.last_switch_at,
        }
    }
}

impl std::fmt::Debug for DegradationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationChain")
            .field("capability", &self.capability)
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

/// A [`KvStore`] that routes through a [`DegradationChain`].
///
/// Store errors and timeouts are absorbed: the failing tier is reported
/// unhealthy and the call retries on the next tier. The caller only sees
/// an error if every tier fails, which a chain ending in
/// [`MemoryKvStore`](crate::kv::MemoryKvStore) never does.
#[derive(Debug, Clone)]
pub struct FallbackKvStore {
    chain: Arc<DegradationChain>,
    store_timeout: Duration,
}

impl FallbackKvStore {
    /// Wrap a chain with the default store timeout.
    #[must_use]
    pub fn new(chain: Arc<DegradationChain>) -> Self {
        Self {
            chain,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-call store timeout.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The underlying chain, for health feedback and observability.
    #[must_use]
    pub fn chain(&self) -> &Arc<DegradationChain> {
        &self.chain
    }

    fn all_tiers_failed(&self, op: &str) -> StoreError {
        StoreError::Unavailable(format!(
            "all tiers failed for capability {} during {op}",
            self.chain.capability()
        ))
    }

    fn tier_failed(&self, tier: usize, op: &str, error: Option<&StoreError>) {
        match error {
            Some(e) => warn!(
                capability = %self.chain.capability(),
                tier,
                op,
                error = %e,
                "store call failed; degrading"
            ),
            None => warn!(
                capability = %self.chain.capability(),
                tier,
                op,
                timeout_ms = self.store_timeout.as_millis() as u64,
                "store call timed out; degrading"
            ),
        }
        self.chain.report_unhealthy(tier);
    }
}

#[async_trait]
impl KvStore for FallbackKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        let start = self.chain.active_tier();
        for tier in start..self.chain.len() {
            match tokio::time::timeout(self.store_timeout, self.chain.store(tier).get(key)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => self.tier_failed(tier, "get", Some(&e)),
                Err(_) => self.tier_failed(tier, "get", None),
            }
        }
        Err(self.all_tiers_failed("get"))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let start = self.chain.active_tier();
        for tier in start..self.chain.len() {
            let attempt = tokio::time::timeout(
                self.store_timeout,
                self.chain
                    .store(tier)
                    .compare_and_set(key, expected_version, value, ttl),
            )
            .await;
            match attempt {
                Ok(Ok(swapped)) => return Ok(swapped),
                Ok(Err(e)) => self.tier_failed(tier, "compare_and_set", Some(&e)),
                Err(_) => self.tier_failed(tier, "compare_and_set", None),
            }
        }
        Err(self.all_tiers_failed("compare_and_set"))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let start = self.chain.active_tier();
        for tier in start..self.chain.len() {
            let attempt = tokio::time::timeout(
                self.store_timeout,
                self.chain.store(tier).set_with_ttl(key, value, ttl),
            )
            .await;
            match attempt {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => self.tier_failed(tier, "set_with_ttl", Some(&e)),
                Err(_) => self.tier_failed(tier, "set_with_ttl", None),
            }
        }
        Err(self.all_tiers_failed("set_with_ttl"))
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        let start = self.chain.active_tier();
        for tier in start..self.chain.len() {
            let attempt = tokio::time::timeout(
                self.store_timeout,
                self.chain.store(tier).scan_prefix(prefix),
            )
            .await;
            match attempt {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(e)) => self.tier_failed(tier, "scan_prefix", Some(&e)),
                Err(_) => self.tier_failed(tier, "scan_prefix", None),
            }
        }
        Err(self.all_tiers_failed("scan_prefix"))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let start = self.chain.active_tier();
        for tier in start..self.chain.len() {
            match tokio::time::timeout(self.store_timeout, self.chain.store(tier).delete(key)).await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => self.tier_failed(tier, "delete", Some(&e)),
                Err(_) => self.tier_failed(tier, "delete", None),
            }
        }
        Err(self.all_tiers_failed("delete"))
    }

    async fn ping(&self) -> StoreResult<()> {
        let (_, store) = self.chain.resolve();
        tokio::time::timeout(self.store_timeout, store.ping())
            .await
            .map_err(|_| StoreError::Timeout {
                op: "ping".to_string(),
                timeout_ms: self.store_timeout.as_millis() as u64,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A store whose health can be toggled; unhealthy calls fail fast.
    struct FlakyStore {
        inner: MemoryKvStore,
        healthy: AtomicBool,
    }

    impl FlakyStore {
        fn new(healthy: bool) -> Self {
            Self {
                inner: MemoryKvStore::new(),
                healthy: AtomicBool::new(healthy),
            }
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        fn check(&self) -> StoreResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StoreError::Unavailable("flaky store down".to_string()))
            }
        }
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn compare_and_set(
            &self,
            key: &str,
            expected_version: Option<u64>,
            value: &[u8],
            ttl: Option<Duration>,
        ) -> StoreResult<bool> {
            self.check()?;
            self.inner.compare_and_set(key, expected_version, value, ttl).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: &[u8],
            ttl: Option<Duration>,
        ) -> StoreResult<()> {
            self.check()?;
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
            self.check()?;
            self.inner.scan_prefix(prefix).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.check()
        }
    }

    fn make_chain(primary: Arc<FlakyStore>, cooldown: Duration) -> Arc<DegradationChain> {
        Arc::new(
            DegradationChain::new(
                "test-store",
                vec![
                    Tier::new("primary", primary),
                    Tier::new("memory", Arc::new(MemoryKvStore::new())),
                ],
            )
            .unwrap()
            .with_probe_cooldown(cooldown),
        )
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = DegradationChain::new("empty", vec![]).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_downgrade_on_first_failure() {
        let primary = Arc::new(FlakyStore::new(false));
        let chain = make_chain(Arc::clone(&primary), Duration::from_secs(60));
        let store = FallbackKvStore::new(Arc::clone(&chain));

        // The call still succeeds, served by the memory tier.
        store.set_with_ttl("k", b"v", None).await.unwrap();
        assert_eq!(chain.active_tier(), 1);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, b"v");
    }

    #[tokio::test]
    async fn test_no_upgrade_without_probe() {
        let primary = Arc::new(FlakyStore::new(false));
        let chain = make_chain(Arc::clone(&primary), Duration::from_secs(60));
        let store = FallbackKvStore::new(Arc::clone(&chain));

        store.set_with_ttl("k", b"v", None).await.unwrap();
        assert_eq!(chain.active_tier(), 1);

        // Primary recovers, but without a probe the chain stays degraded.
        primary.set_healthy(true);
        store.get("k").await.unwrap();
        assert_eq!(chain.active_tier(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_requires_cooldown_and_probe() {
        let primary = Arc::new(FlakyStore::new(false));
        let chain = make_chain(Arc::clone(&primary), Duration::from_secs(60));
        let store = FallbackKvStore::new(Arc::clone(&chain));

        store.set_with_ttl("k", b"v", None).await.unwrap();
        primary.set_healthy(true);

        // Cooldown has not elapsed: the probe is skipped entirely.
        assert_eq!(chain.try_upgrade().await, 1);
    }

    #[tokio::test]
    async fn test_upgrade_after_successful_probe() {
        let primary = Arc::new(FlakyStore::new(false));
        let chain = make_chain(Arc::clone(&primary), Duration::ZERO);
        let store = FallbackKvStore::new(Arc::clone(&chain));

        store.set_with_ttl("k", b"v", None).await.unwrap();
        assert_eq!(chain.active_tier(), 1);

        // Probe fails while the primary is still down.
        assert_eq!(chain.try_upgrade().await, 1);

        // Probe succeeds once it recovers.
        primary.set_healthy(true);
        assert_eq!(chain.try_upgrade().await, 0);
        let snapshot = chain.snapshot();
        assert!(snapshot.healthy[0]);
        assert!(snapshot.last_switch_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_tier_never_marked() {
        let primary = Arc::new(FlakyStore::new(true));
        let chain = make_chain(primary, Duration::ZERO);
        chain.report_unhealthy(1);
        assert_eq!(chain.active_tier(), 0);
        assert!(chain.snapshot().healthy[1]);
    }
}
