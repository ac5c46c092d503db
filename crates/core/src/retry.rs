//! Retry with jittered exponential backoff
//!
//! Only errors that report `is_retryable()` are retried; everything else is
//! returned on the first attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let spread = (delay as f64 * self.jitter_pct) as i64;
        let jittered = if spread > 0 {
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.next_delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying operation");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 10, 200, 0.2)
    }
}
