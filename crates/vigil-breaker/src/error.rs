//! Breaker error types.
//!
//! Runtime operations on the registry are deliberately infallible from
//! the caller's point of view: store trouble degrades to a lower tier,
//! an open breaker is a [`Decision`](crate::registry::Decision) rather
//! than an error. What remains is configuration, which fails fast at
//! construction.

/// Errors from the circuit breaker registry.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// Invalid thresholds or timeouts supplied at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for breaker operations.
pub type BreakerResult<T> = Result<T, BreakerError>;
