//! Semantic validation for `busprobe.toml`.

use super::ProbeConfig;
use thiserror::Error;

/// Errors that can occur during semantic validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("search.timeout_secs must be positive (got {value})")]
    TimeoutNonPositive { value: f64 },

    #[error("search.poll_interval_ms must be positive")]
    PollIntervalZero,

    #[error("search.poll_interval_ms ({interval_ms}) must not exceed the search timeout ({timeout_ms} ms)")]
    PollIntervalExceedsTimeout { interval_ms: u64, timeout_ms: u64 },

    #[error("search.object_path must be an absolute object path (got {path:?})")]
    ObjectPathNotAbsolute { path: String },

    #[error("proxy.wait_timeout_secs must be positive (got {value})")]
    WaitTimeoutNonPositive { value: f64 },

    #[error("bus.default must not be empty")]
    EmptyBus,
}

pub fn validate_config(config: &ProbeConfig) -> Result<(), ValidationError> {
    let timeout = config.search.timeout_secs;
    if !(timeout.is_finite() && timeout > 0.0) {
        return Err(ValidationError::TimeoutNonPositive { value: timeout });
    }

    let interval_ms = config.search.poll_interval_ms;
    if interval_ms == 0 {
        return Err(ValidationError::PollIntervalZero);
    }
    let timeout_ms = (timeout * 1000.0) as u64;
    if interval_ms > timeout_ms {
        return Err(ValidationError::PollIntervalExceedsTimeout {
            interval_ms,
            timeout_ms,
        });
    }

    if !config.search.object_path.starts_with('/') {
        return Err(ValidationError::ObjectPathNotAbsolute {
            path: config.search.object_path.clone(),
        });
    }

    let wait = config.proxy.wait_timeout_secs;
    if !(wait.is_finite() && wait > 0.0) {
        return Err(ValidationError::WaitTimeoutNonPositive { value: wait });
    }

    if config.bus.default.trim().is_empty() {
        return Err(ValidationError::EmptyBus);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProbeConfig::default()), Ok(()));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = ProbeConfig::default();
        config.search.timeout_secs = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::TimeoutNonPositive { .. })
        ));
    }

    #[test]
    fn rejects_poll_interval_longer_than_timeout() {
        let mut config = ProbeConfig::default();
        config.search.timeout_secs = 1.0;
        config.search.poll_interval_ms = 1500;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::PollIntervalExceedsTimeout {
                interval_ms: 1500,
                timeout_ms: 1000
            })
        );
    }

    #[test]
    fn rejects_relative_object_path() {
        let mut config = ProbeConfig::default();
        config.search.object_path = "com/example".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_nan_wait_timeout() {
        let mut config = ProbeConfig::default();
        config.proxy.wait_timeout_secs = f64::NAN;
        assert!(validate_config(&config).is_err());
    }
}
