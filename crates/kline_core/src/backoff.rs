use std::time::Duration;

use rand::Rng;

/// Upper bound on any single wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_millis(60_000);

/// Capped exponential backoff with additive jitter.
///
/// `max_attempts` of `None` retries transient failures forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_exponent: u32,
    pub max_backoff: Duration,
    /// Exclusive upper bound of the random jitter added to computed waits.
    pub jitter: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max_exponent: 8,
            max_backoff: MAX_BACKOFF,
            jitter: Duration::from_millis(1_000),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the wait: `min(max_backoff, base * 2^min(attempts, max_exponent))`.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(self.max_exponent).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Wait before the next attempt. A positive server hint wins over the
    /// exponential schedule; both are capped at `max_backoff`.
    pub fn compute_wait(&self, attempts: u32, hint: Option<Duration>) -> Duration {
        self.compute_wait_with(attempts, hint, &mut rand::thread_rng())
    }

    pub fn compute_wait_with<R: Rng + ?Sized>(
        &self,
        attempts: u32,
        hint: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        if let Some(hint) = hint.filter(|hint| !hint.is_zero()) {
            return hint.min(self.max_backoff);
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        (self.base_delay(attempts) + jitter).min(self.max_backoff)
    }

    /// True once `attempts` failures have used up the configured budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
