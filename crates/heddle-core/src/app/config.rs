//! Client-side configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Settings for a [`WorkQueue`](super::WorkQueue) facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Upper bound on waiting for a commit. Expiry means "outcome unknown".
    pub operation_timeout_ms: u64,

    /// Processor wait between empty takes.
    pub idle_backoff: IdleBackoff,

    /// When a handler fails, hand the task back right away instead of holding it
    /// until the session expires.
    pub release_on_failure: bool,

    /// Most tasks the processor asks for in one take (still capped by free slots).
    pub take_batch: usize,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            idle_backoff: IdleBackoff::default(),
            release_on_failure: false,
            take_batch: 16,
        }
    }
}

impl WorkQueueConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Exponential wait used by the processor while the queue is empty.
///
/// delay = min(base_delay * multiplier^rounds, max_delay), then stretched by up to `jitter`.
///
/// Example with base=10ms, multiplier=2.0, max=1s:
/// - round 0: 10ms
/// - round 1: 20ms
/// - round 7: 1s (capped)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleBackoff {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction in `[0, 1]`; 0 disables jitter.
    pub jitter: f64,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter: 0.1,
        }
    }
}

impl IdleBackoff {
    /// Delay before the next take after `rounds` consecutive empty takes.
    pub fn next_delay(&self, rounds: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let max = self.max_delay_ms as f64;
        let exponent = rounds.min(i32::MAX as u32) as i32;
        let mut delay_ms = (base * self.multiplier.powi(exponent)).min(max);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter > 0.0 {
            delay_ms *= 1.0 + rand::thread_rng().gen_range(0.0..jitter);
        }
        Duration::from_secs_f64(delay_ms.max(0.0) / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn backoff(jitter: f64) -> IdleBackoff {
        IdleBackoff {
            base_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter,
        }
    }

    #[rstest]
    #[case(0, 10)]
    #[case(1, 20)]
    #[case(3, 80)]
    #[case(7, 1_000)]
    #[case(1_000, 1_000)]
    fn backoff_grows_then_caps(#[case] rounds: u32, #[case] expected_ms: u64) {
        assert_eq!(
            backoff(0.0).next_delay(rounds),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = backoff(0.5);
        for _ in 0..100 {
            let delay = policy.next_delay(0);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let config: WorkQueueConfig =
            serde_json::from_str(r#"{ "operation_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.operation_timeout(), Duration::from_millis(250));
        assert_eq!(config.take_batch, 16);
        assert!(!config.release_on_failure);
        assert_eq!(config.idle_backoff.base_delay_ms, 10);
    }
}
