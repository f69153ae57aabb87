//! Vigil Approval - risk-scored human-in-the-loop coordination.
//!
//! An [`ApprovalCoordinator`] receives approval requests tagged with a
//! risk score, decides auto-approve versus require-approval from
//! configured policy, parks pending requests with a TTL, and lets humans
//! resolve them (or a sweep expire them). Subscribers hear about created
//! and resolved requests through a best-effort notification sink.
//!
//! # Request lifecycle
//!
//! ```text
//!   submit ──> auto_approved                    (terminal, no human)
//!   submit ──> pending ──> approved | rejected  (human decision)
//!                     ──> cancelled             (caller withdrew)
//!                     ──> expired               (TTL sweep)
//! ```
//!
//! Terminal requests are immutable: a second resolve, a cancel after
//! resolve, or a resolve after expiry all fail with
//! [`ApprovalError::InvalidState`] rather than silently no-op-ing, so
//! racing callers get a definitive answer. Transitions are linearized
//! through the store's compare-and-set, which makes the expiry sweep safe
//! to run redundantly in every process.
//!
//! # Policy is configuration
//!
//! Risk cutoffs, per-type TTLs, and per-type routing overrides are
//! supplied through [`ApprovalConfig`], not hard-coded: risk policy is a
//! business decision distinct from the coordination mechanism.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod request;

pub use config::{ApprovalConfig, RiskCutoffs, Route};
pub use coordinator::{ApprovalCoordinator, ApprovalStats, ResolutionDecision};
pub use error::{ApprovalError, ApprovalResult};
pub use request::{ApprovalRequest, ApprovalStatus, ApprovalType, RequestId, RiskLevel};
