//! Breaker configuration.

use std::time::Duration;

use crate::error::{BreakerError, BreakerResult};

/// Default sliding-window capacity.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Default failure ratio that trips a closed breaker.
pub const DEFAULT_FAILURE_THRESHOLD_RATIO: f64 = 0.5;

/// Default time an open breaker waits before admitting a probe.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunable parameters for every breaker in a registry.
///
/// Validated once at registry construction; an invalid configuration is
/// rejected there and never surfaces at request time.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Capacity of the per-breaker outcome window.
    pub window_size: usize,
    /// Fraction of the window that must be failures to trip the breaker,
    /// in `(0, 1]`.
    pub failure_threshold_ratio: f64,
    /// How long an open breaker denies calls before admitting a single
    /// half-open probe.
    pub recovery_timeout: Duration,
    /// Bound on a single backing-store call; a slower store counts as
    /// unhealthy and triggers degradation.
    pub store_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            failure_threshold_ratio: DEFAULT_FAILURE_THRESHOLD_RATIO,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            store_timeout: vigil_storage::fallback::DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl BreakerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Configuration`] for an empty window, a
    /// threshold ratio outside `(0, 1]`, or a zero recovery timeout.
    pub fn validate(&self) -> BreakerResult<()> {
        if self.window_size == 0 {
            return Err(BreakerError::Configuration(
                "window_size must be at least 1".to_string(),
            ));
        }
        if !(self.failure_threshold_ratio > 0.0 && self.failure_threshold_ratio <= 1.0) {
            return Err(BreakerError::Configuration(format!(
                "failure_threshold_ratio must be in (0, 1], got {}",
                self.failure_threshold_ratio
            )));
        }
        if self.recovery_timeout.is_zero() {
            return Err(BreakerError::Configuration(
                "recovery_timeout must be non-zero".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(BreakerError::Configuration(
                "store_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = BreakerConfig {
            window_size: 0,
            ..BreakerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BreakerError::Configuration(_))
        ));
    }

    #[test]
    fn test_ratio_bounds() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let config = BreakerConfig {
                failure_threshold_ratio: ratio,
                ..BreakerConfig::default()
            };
            assert!(config.validate().is_err(), "ratio {ratio} should fail");
        }

        let config = BreakerConfig {
            failure_threshold_ratio: 1.0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_recovery_timeout_rejected() {
        let config = BreakerConfig {
            recovery_timeout: Duration::ZERO,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
