//! Breaker state machine: circuit states, outcome window, persisted record.
//!
//! Transitions here are pure functions over a [`BreakerRecord`]. The
//! registry loads a record, applies a transition, and writes it back with
//! compare-and-set; the record itself knows nothing about storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::config::BreakerConfig;

/// The three circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy: all calls permitted.
    Closed,
    /// Tripped: calls denied until the recovery timeout elapses.
    Open,
    /// One probe in flight; everyone else denied until it resolves.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Fixed-capacity ring of the most recent call outcomes.
///
/// `true` entries are successes. The failure ratio is computed against
/// the window *capacity*, not the number of recorded outcomes, so a
/// breaker cannot trip on its very first failure unless the capacity
/// is 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeWindow {
    capacity: usize,
    outcomes: VecDeque<bool>,
}

impl OutcomeWindow {
    /// Create an empty window. Capacity is clamped to at least 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            outcomes: VecDeque::new(),
        }
    }

    /// Append an outcome, evicting the oldest when full.
    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// Drop all recorded outcomes.
    pub fn clear(&mut self) {
        self.outcomes.clear();
    }

    /// Window capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of failures currently in the window.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|ok| !**ok).count()
    }

    /// Number of successes currently in the window.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|ok| **ok).count()
    }

    /// Failures as a fraction of window capacity.
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.failure_count() as f64 / self.capacity as f64
        }
    }
}

/// The persisted per-breaker record.
///
/// Serialized as JSON into the backing store; the store's per-key version
/// linearizes transitions across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    /// Dependency name this breaker guards.
    pub name: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Ring of recent outcomes.
    pub window: OutcomeWindow,
    /// When the breaker last transitioned to `Open`.
    pub opened_at: Option<DateTime<Utc>>,
    /// When a half-open probe was last admitted.
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl BreakerRecord {
    /// A fresh closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, window_size: usize) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            window: OutcomeWindow::new(window_size),
            opened_at: None,
            last_probe_at: None,
        }
    }

    /// Whether an open breaker's recovery timeout has elapsed.
    #[must_use]
    pub fn recovery_elapsed(&self, config: &BreakerConfig, now: DateTime<Utc>) -> bool {
        let Some(opened_at) = self.opened_at else {
            // Open without a timestamp should not happen; treat the
            // recovery window as elapsed so the breaker can probe out.
            return true;
        };
        match chrono::Duration::from_std(config.recovery_timeout) {
            Ok(timeout) => now.signed_duration_since(opened_at) >= timeout,
            Err(_) => false,
        }
    }

    /// Apply a success outcome. Returns `true` if the record changed.
    pub fn apply_success(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.window.record(true);
                true
            },
            CircuitState::HalfOpen => {
                // Probe succeeded: the dependency recovered.
                self.state = CircuitState::Closed;
                self.window.clear();
                self.opened_at = None;
                true
            },
            // No calls are permitted while open; a late report is stale.
            CircuitState::Open => false,
        }
    }

    /// Apply a failure outcome. Returns `true` if the record changed.
    pub fn apply_failure(&mut self, config: &BreakerConfig, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.window.record(false);
                if self.window.failure_ratio() >= config.failure_threshold_ratio {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                }
                true
            },
            CircuitState::HalfOpen => {
                // Probe failed: back to open with a fresh recovery window.
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                true
            },
            CircuitState::Open => false,
        }
    }

    /// Transition `Open -> HalfOpen`, admitting the caller as the probe.
    ///
    /// The caller must have checked [`recovery_elapsed`](Self::recovery_elapsed)
    /// and must commit this record via compare-and-set; the CAS winner is
    /// the one admitted probe.
    pub fn admit_probe(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::HalfOpen;
        self.last_probe_at = Some(now);
    }

    /// Force the breaker closed and clear its window.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.window.clear();
        self.opened_at = None;
        self.last_probe_at = None;
    }
}
