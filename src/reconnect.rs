//! Client reconnect policy
//!
//! Exponential backoff with a capped delay and a capped number of attempts.
//! The relay never depends on this; it exists for clients of the relay
//! (the browser editor follows the same schedule).

use std::time::Duration;

use rand::Rng;

/// Backoff schedule for reconnecting to the relay
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt (values below 1.0 are treated as 1.0)
    pub multiplier: f64,
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    /// Fraction of each delay that may be randomly shaved off, 0.0..=1.0
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay for a zero-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_nan() {
            // zero initial delay times an infinite factor
            return self.initial_delay.min(self.max_delay);
        }
        if secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        // Near Duration::MAX the f64 round trip can still overflow
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Delay before `attempt`, or `None` once the attempt budget is spent
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let base = self.delay_for(attempt);
        let jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        if jitter == 0.0 {
            return Some(base);
        }

        let shave = rng.gen_range(0.0..=jitter);
        let jittered = Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 - shave))
            .map(|delay| delay.min(base))
            .unwrap_or(base);
        Some(jittered)
    }
}

/// Tracks consecutive failures against a policy
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed connection attempt and get the wait before the next one
    pub fn on_failure(&mut self) -> Option<Duration> {
        let delay = self.policy.next_delay(self.attempt)?;
        self.attempt += 1;
        Some(delay)
    }

    /// A successful connection resets the schedule
    pub fn on_connected(&mut self) {
        self.attempt = 0;
    }
}
