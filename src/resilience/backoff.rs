//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay to wait after the `attempt`-th failed attempt (1-based).
///
/// Attempt 1 waits `base_ms`, attempt 2 waits `2 * base_ms`, and so on, capped
/// at `max_ms`. Up to 10% jitter is added on top.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
