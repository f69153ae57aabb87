//! Storage error types.
//!
//! [`StoreError`] is internal to the coordination core: callers of the
//! breaker registry and approval coordinator never see it. Store failures
//! are absorbed by the degradation chain, which downgrades to the next
//! tier instead of propagating.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the configured store timeout.
    #[error("store timeout after {timeout_ms}ms during {op}")]
    Timeout {
        /// The operation that timed out.
        op: String,
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key is malformed for this backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid chain or backend configuration, detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
