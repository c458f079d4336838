use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Reconnect policy: exponential backoff with a cap.
///
/// Disabled by default; a failed connection then stays down until the
/// caller connects again.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomize each delay by ±20%
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Retries allowed after a failure; unlimited when absent
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled policy without jitter.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            enabled: true,
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            multiplier: default_multiplier(),
            jitter: false,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Whether retry number `attempt` (0-based) is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay_ms as f64;
        let exp = attempt.min(63) as i32;
        let mut delay = (self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exp)).min(cap);

        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.8..=1.2);
            delay = delay.min(cap);
        }

        Duration::from_millis(delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let policy = RetryPolicy::default();
        assert!(!policy.enabled);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_max_attempts() {
        let policy = RetryPolicy::exponential(Duration::from_millis(10), Duration::from_millis(100))
            .with_max_attempts(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut policy = RetryPolicy::exponential(Duration::from_millis(1000), Duration::from_millis(1500));
        policy.jitter = true;

        for _ in 0..100 {
            let first = policy.delay_for(0);
            assert!(first >= Duration::from_millis(800));
            assert!(first <= Duration::from_millis(1200));

            // Never above the cap
            assert!(policy.delay_for(5) <= Duration::from_millis(1500));
        }
    }
}
