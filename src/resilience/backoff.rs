//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based; attempt 0 yields no delay.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u32.saturating_pow(attempt - 1);
    let delay = base.saturating_mul(exponential_base);
    let capped_delay = delay.min(max);

    capped_delay + jitter(capped_delay, 0.1)
}

/// Random extra delay in `[0, ratio * delay]`.
pub fn jitter(delay: Duration, ratio: f64) -> Duration {
    let max = delay.mul_f64(ratio.clamp(0.0, 1.0));
    if max.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(100);
        let b1 = calculate_backoff(1, base, Duration::from_secs(2));
        assert!(b1 >= Duration::from_millis(100));

        let b2 = calculate_backoff(2, base, Duration::from_secs(2));
        assert!(b2 >= Duration::from_millis(200));

        let max = calculate_backoff(10, base, Duration::from_secs(1));
        assert!(max >= Duration::from_secs(1) && max <= Duration::from_millis(1100));

        assert_eq!(calculate_backoff(0, base, Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(500);
        for _ in 0..100 {
            assert!(jitter(delay, 0.1) <= Duration::from_millis(50));
        }
        assert_eq!(jitter(delay, 0.0), Duration::ZERO);
        assert_eq!(jitter(Duration::ZERO, 0.5), Duration::ZERO);
    }
}
