//! Exponential backoff with jitter for ingestion retries (§4.3: base 0.1s,
//! factor 2, cap 60s). Generalized from the Binance session manager's
//! xorshift64-jittered backoff calculator.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

pub struct BackoffCalculator {
    config: BackoffConfig,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64 | 1)
                .unwrap_or(12345),
        }
    }

    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    pub fn next_backoff(&mut self) -> Duration {
        let base = (self.config.base_ms as f64) * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_ms as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.config.base_ms as f64);

        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut calc = BackoffCalculator::new(BackoffConfig::default());
        let mut prev = Duration::from_millis(0);
        for _ in 0..20 {
            let next = calc.next_backoff();
            assert!(next.as_millis() as u64 <= 60_000 + 60_000 * 3 / 10);
            prev = next;
        }
        let _ = prev;
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut calc = BackoffCalculator::new(BackoffConfig::default());
        calc.next_backoff();
        calc.next_backoff();
        assert_eq!(calc.attempt(), 2);
        calc.reset();
        assert_eq!(calc.attempt(), 0);
    }
}
