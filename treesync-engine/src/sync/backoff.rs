use rand::Rng;
use std::time::Duration;

/// Exponential retry delay: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay to wait after the failed attempt with zero-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.jitter {
            let mut rng = rand::thread_rng();
            self.delay_with_rng(attempt, &mut rng)
        } else {
            self.ceiling(attempt)
        }
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self.ceiling(attempt);
        if !self.jitter {
            return exp;
        }
        let exp_ms = exp.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(rng.gen_range(0..=exp_ms))
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.min(16);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}
