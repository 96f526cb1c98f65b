use std::time::Duration;

use rand::{Rng, RngCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    pub cap: Duration,
    /// Extra jitter of up to `1 / jitter_divisor` of the undithered delay; 0 disables it.
    pub jitter_divisor: u32,
}

impl BackoffConfig {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: base.max(cap),
            jitter_divisor: 4,
        }
    }

    /// `base * 2^(failures - 1)` clamped to `cap`. Zero failures counts as one.
    pub fn undithered(&self, failures: u32) -> Duration {
        let doublings = failures.max(1) - 1;
        2u32.checked_pow(doublings)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    fn jitter_span(&self, delay: Duration) -> Duration {
        delay.checked_div(self.jitter_divisor).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
pub struct BackoffState<R> {
    cfg: BackoffConfig,
    rng: R,
}

impl<R: RngCore> BackoffState<R> {
    pub fn new(cfg: BackoffConfig, rng: R) -> Self {
        Self { cfg, rng }
    }

    /// Delay to wait after `failures` consecutive failures. Never below the
    /// undithered delay, never above the cap.
    pub fn delay_for(&mut self, failures: u32) -> Duration {
        let delay = self.cfg.undithered(failures);
        let span = self.cfg.jitter_span(delay);
        if span.is_zero() || delay >= self.cfg.cap {
            return delay;
        }
        let jitter = self.rng.gen_range(Duration::ZERO..=span);
        delay.saturating_add(jitter).min(self.cfg.cap)
    }
}
