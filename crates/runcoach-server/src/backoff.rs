//! Retry delays for provider calls.
//!
//! Each delay doubles up to a cap and gets up to 20% random jitter, so the
//! points of one route do not retry a failing provider in lockstep.

use rand::Rng;
use std::time::Duration;

const JITTER_RATIO: f64 = 0.2;

/// Endless sequence of retry delays: `base`, `2 * base`, ... capped at `cap`.
#[derive(Debug, Clone)]
pub struct RetryDelays {
    next: Duration,
    cap: Duration,
}

impl RetryDelays {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            next: base,
            cap: cap.max(base),
        }
    }
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        Some(with_jitter(delay))
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let max_extra_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
    if max_extra_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_extra_ms))
}
