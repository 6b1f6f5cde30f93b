// Retry Policy
// Bounded exponential backoff with jitter for transient provisioning errors

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of each delay randomly added or removed, so units throttled together spread out
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Capped exponential delay before the attempt following `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Sleep before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jittered(self.base_delay(attempt), rand::random::<f64>())
    }

    /// Spread `base` to within `±jitter` of itself; `sample` is uniform in `[0, 1)`
    fn jittered(&self, base: Duration, sample: f64) -> Duration {
        let fraction = self.jitter.clamp(0.0, 1.0);
        if fraction == 0.0 {
            return base;
        }

        let millis = base.as_millis() as f64;
        let spread = millis * fraction;
        let jittered = millis - spread + sample.clamp(0.0, 1.0) * 2.0 * spread;
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        let base = Duration::from_secs(10);

        assert_eq!(policy.jittered(base, 0.0), Duration::from_secs(9));
        assert_eq!(policy.jittered(base, 0.5), Duration::from_secs(10));
        assert_eq!(policy.jittered(base, 1.0), Duration::from_secs(11));

        for attempt in 1..6 {
            let delay = policy.delay_for(attempt);
            let base = policy.base_delay(attempt).as_millis() as f64;
            let millis = delay.as_millis() as f64;
            assert!(millis >= base * 0.9 - 1.0 && millis <= base * 1.1 + 1.0);
        }
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::none().should_retry(1));

        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!zero.should_retry(1));
    }
}
