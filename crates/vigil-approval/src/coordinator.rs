//! The approval coordinator.
//!
//! Owns a degradation chain of stores (shared tier first, process-local
//! memory last) plus a notification sink. Requests live under two key
//! namespaces: a history record per request (retained indefinitely) and
//! a pending-index entry that exists only while the request awaits a
//! decision. Every status transition is a compare-and-set on the history
//! record; the pending index is cleaned up by the transition winner and,
//! for stragglers, by the sweep.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use vigil_events::{ApprovalNotification, NotificationSink, NullSink};
use vigil_storage::fallback::{ChainSnapshot, DegradationChain, FallbackKvStore, Tier};
use vigil_storage::kv::{KvStore, MemoryKvStore};

use crate::config::{ApprovalConfig, Route};
use crate::error::{ApprovalError, ApprovalResult};
use crate::request::{ApprovalRequest, ApprovalStatus, ApprovalType, RequestId, RiskLevel};

const HISTORY_PREFIX: &str = "approval/req/";
const PENDING_PREFIX: &str = "approval/pending/";

/// Bound on CAS retries for one logical transition.
const MAX_CAS_ATTEMPTS: usize = 8;

/// A human's verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Let the action proceed.
    Approve,
    /// Refuse the action.
    Reject,
}

impl ResolutionDecision {
    fn status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// Aggregate counters for observability surfaces.
#[derive(Debug, Clone)]
pub struct ApprovalStats {
    /// Total requests in history.
    pub total: usize,
    /// Count per risk level.
    pub by_risk: HashMap<RiskLevel, usize>,
    /// Count per status.
    pub by_status: HashMap<ApprovalStatus, usize>,
    /// Mean time from creation to a human decision, over approved and
    /// rejected requests. `None` until one exists.
    pub avg_resolution_latency: Option<Duration>,
}

/// Coordinates the approval lifecycle: submit, resolve, cancel, expire.
pub struct ApprovalCoordinator {
    config: ApprovalConfig,
    store: FallbackKvStore,
    chain: Arc<DegradationChain>,
    sink: Arc<dyn NotificationSink>,
}

impl ApprovalCoordinator {
    /// Create a coordinator backed only by process-local memory.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Configuration`] if the config is invalid.
    pub fn new(config: ApprovalConfig) -> ApprovalResult<Self> {
        Self::with_tiers(config, Vec::new())
    }

    /// Create a coordinator backed by a shared store, with memory
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Configuration`] if the config is invalid.
    pub fn with_shared_store(
        config: ApprovalConfig,
        store_name: impl Into<String>,
        store: Arc<dyn KvStore>,
    ) -> ApprovalResult<Self> {
        Self::with_tiers(config, vec![Tier::new(store_name, store)])
    }

    /// Create a coordinator over an explicit tier list. A memory tier is
    /// always appended as the terminal fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Configuration`] if the config is invalid.
    pub fn with_tiers(config: ApprovalConfig, mut tiers: Vec<Tier>) -> ApprovalResult<Self> {
        config.validate()?;
        tiers.push(Tier::new("memory", Arc::new(MemoryKvStore::new())));
        let chain = Arc::new(
            DegradationChain::new("approval-store", tiers)
                .map_err(|e| ApprovalError::Configuration(e.to_string()))?,
        );
        let store =
            FallbackKvStore::new(Arc::clone(&chain)).with_store_timeout(config.store_timeout);
        Ok(Self {
            config,
            store,
            chain,
            sink: Arc::new(NullSink),
        })
    }

    /// Attach a notification sink. Defaults to a sink that drops
    /// everything.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    fn history_key(id: RequestId) -> String {
        format!("{HISTORY_PREFIX}{}", id.0)
    }

    fn pending_key(id: RequestId) -> String {
        format!("{PENDING_PREFIX}{}", id.0)
    }

    /// Submit an action for sign-off.
    ///
    /// Computes the risk level from the score, routes per policy, and
    /// either returns an immediately terminal `auto_approved` request or
    /// parks a `pending` one with a TTL. A creation notification is
    /// emitted only for pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidRiskScore`] for a score outside
    /// `[0, 1]`, or [`ApprovalError::Internal`] if the request cannot be
    /// persisted.
    pub async fn submit(
        &self,
        approval_type: ApprovalType,
        risk_score: f64,
        payload: serde_json::Value,
        requested_by: impl Into<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        if !(0.0..=1.0).contains(&risk_score) {
            return Err(ApprovalError::InvalidRiskScore(risk_score));
        }
        let risk_level = self.config.cutoffs.level_for(risk_score);
        let route = self.config.route(approval_type, risk_level);
        let now = Utc::now();

        let request = ApprovalRequest {
            id: RequestId::new(),
            approval_type,
            risk_score,
            risk_level,
            status: match route {
                Route::AutoApprove => ApprovalStatus::AutoApproved,
                Route::Pending => ApprovalStatus::Pending,
            },
            payload,
            requested_by: requested_by.into(),
            approver_id: None,
            notes: None,
            modifications: None,
            created_at: now,
            expires_at: match route {
                Route::AutoApprove => None,
                Route::Pending => {
                    let ttl = self.config.ttl_for(approval_type);
                    chrono::Duration::from_std(ttl)
                        .ok()
                        .and_then(|delta| now.checked_add_signed(delta))
                },
            },
            resolved_at: None,
        };

        self.persist_new(&request).await?;

        if request.is_pending() {
            self.sink.publish(&ApprovalNotification::Created {
                request_id: request.id.0,
                approval_type: request.approval_type.as_str().to_string(),
                risk_level: request.risk_level.as_str().to_string(),
                payload_summary: request.payload_summary(self.config.summary_max_chars),
            });
            info!(
                request_id = %request.id,
                approval_type = %request.approval_type,
                risk_level = %request.risk_level,
                "approval request parked for review"
            );
        } else {
            debug!(
                request_id = %request.id,
                risk_level = %request.risk_level,
                "request auto-approved by policy"
            );
        }
        Ok(request)
    }

    async fn persist_new(&self, request: &ApprovalRequest) -> ApprovalResult<()> {
        let bytes = serde_json::to_vec(request)
            .map_err(|e| ApprovalError::Internal(format!("encode request: {e}")))?;
        let created = self
            .store
            .compare_and_set(&Self::history_key(request.id), None, &bytes, None)
            .await
            .map_err(|e| ApprovalError::Internal(format!("persist request: {e}")))?;
        if !created {
            return Err(ApprovalError::Internal(format!(
                "request id collision for {}",
                request.id
            )));
        }
        if request.is_pending() {
            // Index entry so the sweep and pending listings need not scan
            // all of history. Cleaned up by whoever wins the transition.
            if let Err(e) = self
                .store
                .set_with_ttl(&Self::pending_key(request.id), request.id.0.as_bytes(), None)
                .await
            {
                error!(request_id = %request.id, error = %e, "failed to index pending request");
            }
        }
        Ok(())
    }

    async fn load(&self, id: RequestId) -> ApprovalResult<(ApprovalRequest, u64)> {
        let entry = self
            .store
            .get(&Self::history_key(id))
            .await
            .map_err(|e| ApprovalError::Internal(format!("load request: {e}")))?
            .ok_or(ApprovalError::NotFound(id))?;
        let request = serde_json::from_slice(&entry.value)
            .map_err(|e| ApprovalError::Internal(format!("decode request {id}: {e}")))?;
        Ok((request, entry.version))
    }

    async fn commit(
        &self,
        request: &ApprovalRequest,
        expected_version: u64,
    ) -> ApprovalResult<bool> {
        let bytes = serde_json::to_vec(request)
            .map_err(|e| ApprovalError::Internal(format!("encode request: {e}")))?;
        self.store
            .compare_and_set(
                &Self::history_key(request.id),
                Some(expected_version),
                &bytes,
                None,
            )
            .await
            .map_err(|e| ApprovalError::Internal(format!("store request: {e}")))
    }

    /// Remove the pending-index entry and announce a terminal status.
    async fn finish(&self, request: &ApprovalRequest) {
        if let Err(e) = self.store.delete(&Self::pending_key(request.id)).await {
            // The sweep removes orphaned index entries later.
            warn!(request_id = %request.id, error = %e, "failed to drop pending index entry");
        }
        self.sink.publish(&ApprovalNotification::Resolved {
            request_id: request.id.0,
            status: request.status.as_str().to_string(),
            approver_id: request.approver_id.clone(),
        });
    }

    /// Resolve a pending request with a human decision.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] for an unknown id;
    /// [`ApprovalError::InvalidState`] if the request is no longer
    /// pending, including when a concurrent resolve, cancel, or expiry
    /// sweep won the transition first.
    pub async fn resolve(
        &self,
        id: RequestId,
        approver_id: impl Into<String>,
        decision: ResolutionDecision,
        notes: Option<String>,
        modifications: Option<serde_json::Value>,
    ) -> ApprovalResult<ApprovalRequest> {
        let approver_id = approver_id.into();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (request, version) = self.load(id).await?;
            if request.status != ApprovalStatus::Pending {
                return Err(ApprovalError::InvalidState {
                    id,
                    status: request.status,
                });
            }
            let mut next = request;
            next.status = decision.status();
            next.approver_id = Some(approver_id.clone());
            next.notes = notes.clone();
            next.modifications = modifications.clone();
            next.resolved_at = Some(Utc::now());

            if self.commit(&next, version).await? {
                info!(
                    request_id = %id,
                    status = %next.status,
                    approver_id = %approver_id,
                    "approval request resolved"
                );
                self.finish(&next).await;
                return Ok(next);
            }
            // Lost the transition race; re-read and re-check the guard.
        }
        Err(ApprovalError::Internal(format!(
            "resolve abandoned after CAS contention for {id}"
        )))
    }

    /// Withdraw a pending request. Best-effort: if a concurrent resolve
    /// or expiry wins, this fails with [`ApprovalError::InvalidState`]
    /// and the caller must treat the request as already settled.
    ///
    /// # Errors
    ///
    /// Same guards as [`resolve`](Self::resolve).
    pub async fn cancel(&self, id: RequestId) -> ApprovalResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (request, version) = self.load(id).await?;
            if request.status != ApprovalStatus::Pending {
                return Err(ApprovalError::InvalidState {
                    id,
                    status: request.status,
                });
            }
            let mut next = request;
            next.status = ApprovalStatus::Cancelled;
            next.resolved_at = Some(Utc::now());

            if self.commit(&next, version).await? {
                info!(request_id = %id, "approval request cancelled");
                self.finish(&next).await;
                return Ok(());
            }
        }
        Err(ApprovalError::Internal(format!(
            "cancel abandoned after CAS contention for {id}"
        )))
    }

    /// Expire overdue pending requests. Returns the ids transitioned.
    ///
    /// Safe to run concurrently with `resolve` (and with itself in other
    /// processes): whichever operation wins the CAS owns the transition;
    /// the loser observes a terminal status and drops its side silently,
    /// so no request is double-notified.
    pub async fn sweep_expired(&self) -> Vec<RequestId> {
        let now = Utc::now();
        let entries = match self.store.scan_prefix(PENDING_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "store unavailable on every tier");
                return Vec::new();
            },
        };

        let mut expired = Vec::new();
        for (key, _) in entries {
            let Some(id) = key
                .strip_prefix(PENDING_PREFIX)
                .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
                .map(RequestId)
            else {
                warn!(key, "dropping malformed pending index entry");
                let _ = self.store.delete(&key).await;
                continue;
            };

            match self.load(id).await {
                Ok((request, version)) => {
                    if request.status != ApprovalStatus::Pending {
                        // Stale index entry left behind by a crashed
                        // resolver; no notification, just cleanup.
                        let _ = self.store.delete(&key).await;
                        continue;
                    }
                    if !request.is_expired_by(now) {
                        continue;
                    }
                    let mut next = request;
                    next.status = ApprovalStatus::Expired;
                    next.resolved_at = Some(now);
                    match self.commit(&next, version).await {
                        Ok(true) => {
                            info!(request_id = %id, "approval request expired");
                            self.finish(&next).await;
                            expired.push(id);
                        },
                        // A racing resolve won; it owns the notification.
                        Ok(false) => {},
                        Err(e) => {
                            error!(request_id = %id, error = %e, "failed to expire request");
                        },
                    }
                },
                Err(ApprovalError::NotFound(_)) => {
                    let _ = self.store.delete(&key).await;
                },
                Err(e) => {
                    error!(request_id = %id, error = %e, "failed to load pending request");
                },
            }
        }
        expired
    }

    /// Pending requests, optionally filtered by risk level, oldest first.
    pub async fn list_pending(&self, risk_level: Option<RiskLevel>) -> Vec<ApprovalRequest> {
        let entries = match self.store.scan_prefix(PENDING_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "store unavailable on every tier");
                return Vec::new();
            },
        };

        let mut pending = Vec::new();
        for (key, _) in entries {
            let Some(id) = key
                .strip_prefix(PENDING_PREFIX)
                .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
                .map(RequestId)
            else {
                continue;
            };
            if let Ok((request, _)) = self.load(id).await {
                if request.status == ApprovalStatus::Pending
                    && risk_level.map_or(true, |wanted| wanted == request.risk_level)
                {
                    pending.push(request);
                }
            }
        }
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Most recent requests from history, optionally filtered by
    /// requester, newest first.
    pub async fn get_history(&self, limit: usize, requester: Option<&str>) -> Vec<ApprovalRequest> {
        let entries = match self.store.scan_prefix(HISTORY_PREFIX).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "store unavailable on every tier");
                return Vec::new();
            },
        };

        let mut history: Vec<ApprovalRequest> = entries
            .iter()
            .filter_map(|(key, entry)| {
                match serde_json::from_slice::<ApprovalRequest>(&entry.value) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        warn!(key, error = %e, "skipping corrupt approval record");
                        None
                    },
                }
            })
            .filter(|request| requester.map_or(true, |who| request.requested_by == who))
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit);
        history
    }

    /// Aggregate counters over the full history.
    pub async fn stats(&self) -> ApprovalStats {
        let history = self.get_history(usize::MAX, None).await;
        let mut by_risk: HashMap<RiskLevel, usize> = HashMap::new();
        let mut by_status: HashMap<ApprovalStatus, usize> = HashMap::new();
        let mut latencies = Vec::new();

        for request in &history {
            *by_risk.entry(request.risk_level).or_default() += 1;
            *by_status.entry(request.status).or_default() += 1;
            if matches!(
                request.status,
                ApprovalStatus::Approved | ApprovalStatus::Rejected
            ) {
                if let Some(resolved_at) = request.resolved_at {
                    if let Ok(latency) = (resolved_at - request.created_at).to_std() {
                        latencies.push(latency);
                    }
                }
            }
        }

        let avg_resolution_latency = if latencies.is_empty() {
            None
        } else {
            let total: Duration = latencies.iter().sum();
            Some(total / latencies.len() as u32)
        };

        ApprovalStats {
            total: history.len(),
            by_risk,
            by_status,
            avg_resolution_latency,
        }
    }

    /// Spawn the recurring expiry sweep.
    ///
    /// May run in one process or redundantly in all of them; the CAS
    /// transition guard makes redundant sweeps harmless. Also probes
    /// degraded store tiers between sweeps.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = coordinator.sweep_expired().await;
                if !expired.is_empty() {
                    debug!(count = expired.len(), "sweep expired requests");
                }
                coordinator.chain.try_upgrade().await;
            }
        })
    }

    /// Probe degraded store tiers and restore the highest healthy one.
    pub async fn maintain(&self) {
        self.chain.try_upgrade().await;
    }

    /// Current degradation state of the backing store chain.
    #[must_use]
    pub fn degradation(&self) -> ChainSnapshot {
        self.chain.snapshot()
    }
}

impl std::fmt::Debug for ApprovalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
