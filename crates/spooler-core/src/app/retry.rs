//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

/// Backoff policy for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Floor: the delay after the first failure, and after every reset.
    pub min_delay: Duration,

    /// Ceiling for the base delay (jitter may add on top).
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Jitter is drawn uniformly from `0..=jitter_factor * current`.
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            min_delay: config.min_backoff(),
            max_delay: config.max_backoff(),
            multiplier: 2.0,
            jitter_factor: config.jitter_factor,
        }
    }

    /// `current + uniform(0, jitter_factor * current)`.
    pub fn jittered<R: Rng + ?Sized>(&self, current: Duration, rng: &mut R) -> Duration {
        let spread = current.as_secs_f64() * self.jitter_factor;
        if spread <= 0.0 {
            return current;
        }
        current + Duration::from_secs_f64(rng.gen_range(0.0..=spread))
    }

    /// Next base delay after `current`, capped at `max_delay`.
    pub fn grow(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.multiplier;
        if !next.is_finite() || next >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(next).max(self.min_delay)
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Worker-global backoff state.
///
/// One instance per worker, not per item: a failing item's delay also
/// throttles the next item's first attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.min_delay;
        Self { policy, current }
    }

    /// Base delay that the next failure will wait (before jitter).
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.policy.min_delay;
    }

    /// Delay to sleep now; doubles the base for next time.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.policy.jittered(self.current, rng);
        self.current = self.policy.grow(self.current);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(jitter: f64) -> BackoffPolicy {
        BackoffPolicy {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: jitter,
        }
    }

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter_factor, 0.3);
    }

    #[test]
    fn exponential_backoff_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new(policy(0.0));
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();

        // 1s, 2s, 4s, ... 60s で頭打ち
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::new(policy(0.0));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(4));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = policy(0.3);
        let base = Duration::from_secs(10);

        for _ in 0..1_000 {
            let d = policy.jittered(base, &mut rng);
            assert!(d >= base);
            assert!(d <= Duration::from_secs(13));
        }
    }
}
