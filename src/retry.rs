//! Backoff policies and cancellable delays.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff bounds for the supervisor's reconnect loop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub min_backoff: Duration,
    /// Cap on the delay between attempts.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Swaps inverted bounds so the loop always sees `min <= max`.
    pub(crate) fn normalize(&mut self) {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
    }
}

/// Sleeps for `delay` unless the token fires first.
///
/// Returns `false` if cancelled, `true` if the full delay elapsed.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Next delay in an unbounded exponential backoff sequence.
///
/// Doubles `current`, caps at `max`, and adds up to 10% jitter so restarting
/// peers do not reconnect in lockstep.
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let doubled = current.saturating_mul(2).min(max);
    let jitter = doubled.mul_f64(fastrand::f64() * 0.1);
    doubled + jitter
}

/// Delay before retry number `attempt` (1-based) in a bounded retry loop.
///
/// `base * 2^(attempt-1)`, capped at `max`, with up to 10% jitter.
pub(crate) fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32 << exp).min(max);
    let jitter = scaled.mul_f64(fastrand::f64() * 0.1);
    scaled + jitter
}
