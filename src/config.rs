//! Engine configuration
//!
//! Tuning knobs for the parallel I/O engine. Per-file striping parameters
//! (chunk size, target list, pattern type) live on
//! [`StripePattern`](crate::striping::StripePattern); this module only
//! covers the engine-wide settings.

use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Default maximum number of targets contacted in parallel per stripe set
pub const DEFAULT_MAX_FAN_OUT: usize = 8;

/// Default communication retry budget per logical call
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Default timeout for the readiness poll when every exchange is waiting
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Default first step of the exponential retry backoff
pub const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Default upper bound of the exponential retry backoff
pub const DEFAULT_RETRY_BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Default pause before re-probing a target that is neither good nor offline
pub const DEFAULT_STATE_COOLDOWN: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the I/O engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of per-target exchanges driven in parallel per round
    pub max_fan_out: usize,

    /// Maximum number of communication retries (0 = unlimited)
    pub max_retries: u32,

    /// Whether communication retries are performed at all
    pub retries_enabled: bool,

    /// Poll timeout used when every exchange is blocked on readiness
    pub poll_timeout: Duration,

    /// First step of the exponential backoff between retries
    pub retry_backoff_base: Duration,

    /// Cap on the exponential backoff between retries
    pub retry_backoff_cap: Duration,

    /// Pause before re-probing targets in an indeterminate health state
    pub state_cooldown: Duration,

    /// Forward quota owner information on write requests
    pub quota_enabled: bool,

    /// Ask servers to skip disk I/O (network benchmarking mode)
    pub bench_disable_io: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fan_out: DEFAULT_MAX_FAN_OUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retries_enabled: true,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            retry_backoff_cap: DEFAULT_RETRY_BACKOFF_CAP,
            state_cooldown: DEFAULT_STATE_COOLDOWN,
            quota_enabled: false,
            bench_disable_io: false,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_fan_out == 0 {
            return Err(Error::InvalidConfig("max_fan_out must be > 0".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::InvalidConfig("poll_timeout must be > 0".into()));
        }
        if self.retry_backoff_base.is_zero() {
            return Err(Error::InvalidConfig(
                "retry_backoff_base must be > 0".into(),
            ));
        }
        if self.retry_backoff_cap < self.retry_backoff_base {
            return Err(Error::InvalidConfig(
                "retry_backoff_cap must be >= retry_backoff_base".into(),
            ));
        }
        Ok(())
    }

    /// Backoff delay before retry number `retry_num` (0-based).
    ///
    /// Doubles per retry, saturating at `retry_backoff_cap`.
    pub fn retry_backoff(&self, retry_num: u32) -> Duration {
        let base = self.retry_backoff_base;
        let factor = 1u32.checked_shl(retry_num).unwrap_or(u32::MAX);
        base.checked_mul(factor)
            .unwrap_or(self.retry_backoff_cap)
            .min(self.retry_backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_fan_out, DEFAULT_MAX_FAN_OUT);
        assert!(config.retries_enabled);
        assert!(!config.quota_enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.max_fan_out = 0;
        assert!(config.validate().is_err());
        config.max_fan_out = 4;

        config.poll_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_timeout = DEFAULT_POLL_TIMEOUT;

        config.retry_backoff_cap = Duration::from_millis(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = EngineConfig {
            retry_backoff_base: Duration::from_millis(10),
            retry_backoff_cap: Duration::from_millis(100),
            ..Default::default()
        };

        assert_eq!(config.retry_backoff(0), Duration::from_millis(10));
        assert_eq!(config.retry_backoff(1), Duration::from_millis(20));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(40));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(80));
        assert_eq!(config.retry_backoff(4), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(63), Duration::from_millis(100));
    }
}
