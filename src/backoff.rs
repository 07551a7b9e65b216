use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Delay schedule between retries of a failing storage or source call.
///
/// Delays grow as `initial_ms * factor^n`, capped at `max_ms`, plus up to
/// `jitter_ms` of random jitter. The retried call itself is never given up
/// on; the policy only spaces the attempts out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 10,
            max_ms: 5_000,
            factor: 2.0,
            jitter_ms: 10,
        }
    }
}

impl BackoffPolicy {
    /// Retry without waiting.
    pub fn immediate() -> Self {
        Self {
            initial_ms: 0,
            max_ms: 0,
            factor: 1.0,
            jitter_ms: 0,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            initial_ms: ms,
            max_ms: ms,
            factor: 1.0,
            jitter_ms: 0,
        }
    }

    /// Delay before retry number `failures` (1 for the first retry).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(63) as i32;
        let scaled = (self.initial_ms as f64 * self.factor.powi(exp)).min(self.max_ms as f64);
        let base = scaled.max(0.0) as u64;
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.jitter_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }

    pub(crate) fn validate(&self, which: &'static str) -> Result<(), ConfigError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::InvalidBackoff {
                which,
                reason: "factor must be a finite number >= 1",
            });
        }
        if self.max_ms < self.initial_ms {
            return Err(ConfigError::InvalidBackoff {
                which,
                reason: "max_ms must not be below initial_ms",
            });
        }
        Ok(())
    }
}
