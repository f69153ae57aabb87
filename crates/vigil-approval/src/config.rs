//! Approval policy configuration.
//!
//! Everything here is a business decision, not mechanism: where the
//! score cutoffs sit, which types always see a human, which types may
//! skip one, and how long a request waits before expiring. Validated
//! once at coordinator construction; never fails at request time.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{ApprovalError, ApprovalResult};
use crate::request::{ApprovalType, RiskLevel};

/// Default TTL for a pending request.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Score cutoffs mapping a risk score in `[0, 1]` to a [`RiskLevel`].
///
/// Scores below `low` are `Low`, below `medium` are `Medium`, below
/// `high` are `High`, the rest `Critical`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCutoffs {
    /// Upper bound (exclusive) of the low band.
    pub low: f64,
    /// Upper bound (exclusive) of the medium band.
    pub medium: f64,
    /// Upper bound (exclusive) of the high band.
    pub high: f64,
}

impl Default for RiskCutoffs {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.85,
        }
    }
}

impl RiskCutoffs {
    /// Map a score to its level.
    #[must_use]
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score < self.low {
            RiskLevel::Low
        } else if score < self.medium {
            RiskLevel::Medium
        } else if score < self.high {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    fn validate(&self) -> ApprovalResult<()> {
        let ascending = self.low > 0.0 && self.low < self.medium && self.medium < self.high;
        if !ascending || !(self.high <= 1.0) {
            return Err(ApprovalError::Configuration(format!(
                "risk cutoffs must satisfy 0 < low < medium < high <= 1, got {} / {} / {}",
                self.low, self.medium, self.high
            )));
        }
        Ok(())
    }
}

/// Where a submitted request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Approved by policy at submit time; terminal immediately.
    AutoApprove,
    /// Parked for a human decision.
    Pending,
}

/// Full coordinator configuration.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Score-to-level cutoffs.
    pub cutoffs: RiskCutoffs,
    /// TTL applied when no per-type TTL is configured.
    pub default_ttl: Duration,
    /// Per-type TTL overrides.
    pub ttl_by_type: HashMap<ApprovalType, Duration>,
    /// Types that always go to a human, whatever the score.
    pub always_review_types: HashSet<ApprovalType>,
    /// Types whose medium/high requests may skip the human. Critical
    /// never skips.
    pub auto_approve_types: HashSet<ApprovalType>,
    /// Bound on a single backing-store call.
    pub store_timeout: Duration,
    /// Character budget for the `payload_summary` in notifications.
    pub summary_max_chars: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            cutoffs: RiskCutoffs::default(),
            default_ttl: DEFAULT_TTL,
            ttl_by_type: HashMap::new(),
            always_review_types: HashSet::new(),
            auto_approve_types: HashSet::new(),
            store_timeout: vigil_storage::fallback::DEFAULT_STORE_TIMEOUT,
            summary_max_chars: 160,
        }
    }
}

impl ApprovalConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Configuration`] for non-ascending
    /// cutoffs, zero TTLs, a zero store timeout, or a type listed both
    /// as always-review and auto-approve.
    pub fn validate(&self) -> ApprovalResult<()> {
        self.cutoffs.validate()?;
        if self.default_ttl.is_zero() {
            return Err(ApprovalError::Configuration(
                "default_ttl must be non-zero".to_string(),
            ));
        }
        for (approval_type, ttl) in &self.ttl_by_type {
            if ttl.is_zero() {
                return Err(ApprovalError::Configuration(format!(
                    "ttl for {approval_type} must be non-zero"
                )));
            }
        }
        if self.store_timeout.is_zero() {
            return Err(ApprovalError::Configuration(
                "store_timeout must be non-zero".to_string(),
            ));
        }
        if let Some(conflict) = self
            .always_review_types
            .intersection(&self.auto_approve_types)
            .next()
        {
            return Err(ApprovalError::Configuration(format!(
                "{conflict} is listed as both always-review and auto-approve"
            )));
        }
        Ok(())
    }

    /// TTL for a given approval type.
    #[must_use]
    pub fn ttl_for(&self, approval_type: ApprovalType) -> Duration {
        self.ttl_by_type
            .get(&approval_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Routing policy: where does a `(type, level)` pair go.
    ///
    /// Critical and always-review types go to a human. Low risk is
    /// auto-approved. Medium/high go to a human unless the type carries
    /// an auto-approve override.
    #[must_use]
    pub fn route(&self, approval_type: ApprovalType, level: RiskLevel) -> Route {
        if level == RiskLevel::Critical || self.always_review_types.contains(&approval_type) {
            return Route::Pending;
        }
        if level == RiskLevel::Low {
            return Route::AutoApprove;
        }
        if self.auto_approve_types.contains(&approval_type) {
            return Route::AutoApprove;
        }
        Route::Pending
    }
}
