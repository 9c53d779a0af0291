//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff configuration for supervised reconnects.
///
/// Exponential backoff with additive jitter, capped at `max_delay_ms`.
/// Transient disconnects retry forever; the cap keeps a flapping remote from
/// turning the supervisor into a tight reconnect loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Base delay for the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) added on top of the computed delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_factor: 0.25,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with no delay at all, for tests.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped, with additive jitter in
    /// `[0, jitter_factor * delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let exp_delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        let capped_ms = exp_delay_ms.min(self.max_delay_ms);

        let jitter_range = (capped_ms as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_ms.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 60_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_600));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
        // Huge attempt counts must not overflow.
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ReconnectPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_factor: 0.5,
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_500));
        }
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let policy = ReconnectPolicy::immediate();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(42), Duration::ZERO);
    }
}
