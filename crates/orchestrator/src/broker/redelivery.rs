//! Redelivery backoff for failed deliveries

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often and how fast a failed delivery is redelivered
///
/// Exponential backoff with jitter; after `max_attempts` deliveries the
/// message is dead-lettered.
///
/// # Example
///
/// ```
/// use flowline_orchestrator::broker::RedeliveryPolicy;
/// use std::time::Duration;
///
/// let policy = RedeliveryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(200))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
/// assert!(!policy.has_attempts_remaining(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedeliveryPolicy {
    /// Maximum number of deliveries (including the first)
    pub max_attempts: u32,

    /// Delay before the first redelivery
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound on the delay between deliveries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means +/-10%
    pub jitter: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RedeliveryPolicy {
    /// 5 deliveries, 100ms doubling up to 10s, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Deliver once, dead-letter on the first failure
    pub fn no_redelivery() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Constant interval between deliveries
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before delivery number `attempt` (1-based); zero for the first
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let redelivery = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(redelivery as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether a message delivered `attempt` times may be delivered again
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

pub(super) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = RedeliveryPolicy::exponential()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(3))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RedeliveryPolicy::fixed(Duration::from_millis(100), 3).with_jitter(0.5);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_no_redelivery() {
        let policy = RedeliveryPolicy::no_redelivery();
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_serde_uses_millis() {
        let policy = RedeliveryPolicy::fixed(Duration::from_millis(250), 2);
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["initial_interval"], 250);

        let decoded: RedeliveryPolicy = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, policy);
    }
}
