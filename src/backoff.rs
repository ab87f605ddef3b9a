//! Jittered exponential backoff shared by the short-code poller and the
//! WebSocket relay reconnect loop (spec §7): 1s base, doubling each
//! attempt, capped at 30s, ±10% jitter so many clients retrying at once
//! don't all land on the relay in the same instant.

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(30);
const MULTIPLIER: u32 = 2;
const JITTER_FRACTION: f64 = 0.1;

/// Delay to sleep before retry number `attempt` (0-indexed: `attempt == 0`
/// is the delay before the *first* retry, after the initial try failed).
pub fn next_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(5); // 1s * 2^5 = 32s already exceeds the cap
    let unjittered = BASE
        .checked_mul(MULTIPLIER.saturating_pow(exponent))
        .unwrap_or(CAP)
        .min(CAP);

    let mut rng = rand::rng();
    let jitter = rng.random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let millis = unjittered.as_millis() as f64 * (1.0 + jitter);
    Duration::from_millis(millis.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_roughly_one_second() {
        let delay = next_delay(0);
        assert!(delay.as_millis() >= 900 && delay.as_millis() <= 1100, "{delay:?}");
    }

    #[test]
    fn test_delay_is_capped_at_thirty_seconds() {
        for attempt in 6..20 {
            let delay = next_delay(attempt);
            assert!(delay.as_millis() <= (CAP.as_millis() as f64 * 1.1) as u128, "{delay:?}");
        }
    }

    #[test]
    fn test_delay_grows_with_attempt_number() {
        // Jitter makes individual samples noisy, but the trend across many
        // attempts should still be monotonic on average.
        let early: u128 = (0..20).map(|_| next_delay(0).as_millis()).sum();
        let later: u128 = (0..20).map(|_| next_delay(3).as_millis()).sum();
        assert!(later > early);
    }
}
