//! Retry delays shared by the facade and both submitters.

use std::time::Duration;

use rand::Rng;

/// Upper bound of the random spread added to each delay, as a fraction.
const JITTER_FRACTION: f64 = 0.1;

/// Delay before retry number `attempt` (1-based).
///
/// Retry 1 waits `base_ms`, every later retry twice the previous one, never
/// more than `max_ms`. Up to 10% extra is added so submitters sharing an
/// endpoint spread out. Attempt 0 is the first try and does not wait.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let Some(retry) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };

    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    let millis = base_ms.saturating_mul(factor).min(max_ms);
    Duration::from_millis(millis).mul_f64(1.0 + jitter())
}

fn jitter() -> f64 {
    rand::thread_rng().gen_range(0.0..JITTER_FRACTION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(delay: Duration, millis: u64) -> bool {
        let low = Duration::from_millis(millis);
        delay >= low && delay <= low.mul_f64(1.0 + JITTER_FRACTION)
    }

    #[test]
    fn test_first_try_does_not_wait() {
        assert_eq!(calculate_backoff(0, 1_000, 30_000), Duration::ZERO);
    }

    #[test]
    fn test_doubles_per_retry() {
        assert!(within(calculate_backoff(1, 1_000, 30_000), 1_000));
        assert!(within(calculate_backoff(2, 1_000, 30_000), 2_000));
        assert!(within(calculate_backoff(4, 1_000, 30_000), 8_000));
    }

    #[test]
    fn test_capped_even_for_huge_attempts() {
        assert!(within(calculate_backoff(6, 1_000, 30_000), 30_000));
        assert!(within(calculate_backoff(200, 1_000, 30_000), 30_000));
    }
}
