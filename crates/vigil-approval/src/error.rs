//! Approval error types.

use crate::request::{ApprovalStatus, RequestId};

/// Errors from the approval coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// The referenced request does not exist.
    #[error("approval request not found: {0}")]
    NotFound(RequestId),

    /// The request is no longer pending; terminal states are immutable.
    ///
    /// Racing callers receive this as a definitive answer: an expired
    /// request surfaces its `expired` status here, not a generic
    /// not-found.
    #[error("invalid state: request {id} is {status}, expected pending")]
    InvalidState {
        /// The request that was in the wrong state.
        id: RequestId,
        /// Its current (terminal) status.
        status: ApprovalStatus,
    },

    /// The submitted risk score is outside `[0, 1]`.
    #[error("risk score must be within [0, 1], got {0}")]
    InvalidRiskScore(f64),

    /// Invalid cutoffs or TTLs supplied at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal coordination failure (store exhausted, encoding).
    #[error("internal approval error: {0}")]
    Internal(String),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
