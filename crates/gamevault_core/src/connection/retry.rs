//! Backoff schedule and the sleep seam used between attempts.

use crate::config::RetryPolicy;
use std::time::Duration;

/// Blocks the current thread between attempts.
///
/// Retry waits are the only suspension points of the supervisor; tests swap
/// this out to observe the schedule without waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Delay after failed attempt `attempt` (0-indexed):
/// `min(base * multiplier^attempt, max)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(exponent);
    let max = policy.max_delay_ms as f64;
    let capped = if scaled.is_finite() { scaled.min(max) } else { max };
    Duration::from_millis(capped.round() as u64)
}

/// Every wait the policy can produce, in order.
pub fn backoff_schedule(policy: &RetryPolicy) -> Vec<Duration> {
    (0..policy.max_attempts.saturating_sub(1))
        .map(|attempt| backoff_delay(policy, attempt))
        .collect()
}
