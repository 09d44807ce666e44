//! Delay policies for the per-bundle polling loop.

use std::time::Duration;

use rand::Rng;

/// Base delay for the first retry after a failed build.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Exponential backoff: `base * 2^retry`, capped at `cap`.
///
/// Saturates instead of overflowing, so a long outage cannot wrap the delay
/// back down.
pub fn exponential(base: Duration, cap: Duration, retry: u32) -> Duration {
    let factor = 2u32.checked_pow(retry.min(31)).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor);
    delay.min(cap)
}

/// Uniform random delay in `[min, max]`, used between successful polls so a
/// fleet restarted together does not hammer the upstream in lockstep.
pub fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}
