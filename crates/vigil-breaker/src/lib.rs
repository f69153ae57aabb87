//! Vigil Breaker - per-dependency failure isolation.
//!
//! A [`CircuitBreakerRegistry`] maintains one breaker state machine per
//! named external dependency (a tool, an API, a model backend). Callers
//! ask [`allow`](CircuitBreakerRegistry::allow) before invoking the
//! dependency and report the outcome back with
//! [`record_success`](CircuitBreakerRegistry::record_success) /
//! [`record_failure`](CircuitBreakerRegistry::record_failure).
//!
//! # State machine
//!
//! ```text
//!            ratio of failures in window >= threshold
//!   CLOSED ─────────────────────────────────────────────> OPEN
//!     ^                                                    │
//!     │ probe succeeds                 recovery timeout    │
//!     │                                elapsed (one probe) v
//!     └──────────────────────────── HALF_OPEN <────────────┘
//!                                        │ probe fails
//!                                        └───────> OPEN (fresh opened_at)
//! ```
//!
//! # Consistency
//!
//! Breaker records live in a shared key-value store so that several
//! service processes observe one logical breaker. Every transition is a
//! compare-and-set on the record's version; in particular the
//! OPEN -> HALF_OPEN admission is won by exactly one concurrent caller,
//! so an unhealthy dependency is never double-probed or stampeded on
//! recovery. If the shared store misbehaves, the registry degrades to a
//! process-local tier and keeps enforcing breaker logic there; it never
//! blocks the caller and never silently stops enforcing.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod registry;
pub mod state;

pub use config::BreakerConfig;
pub use error::{BreakerError, BreakerResult};
pub use registry::{BreakerSnapshot, CircuitBreakerRegistry, Decision};
pub use state::{BreakerRecord, CircuitState, OutcomeWindow};
