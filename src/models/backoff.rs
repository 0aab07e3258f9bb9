use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a ceiling: attempt k waits
/// `initial_delay * multiplier^(k-1)`, capped at `max_delay`, with ±`jitter`
/// randomization applied when scheduling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Unjittered delay after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Scheduled delay with jitter, still bounded by `max_delay`.
    pub fn next_attempt_in(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay(attempt), self.jitter).min(self.max_delay)
    }
}

/// Retryable HTTP status set: request timeout, too many requests and the
/// transient 5xx family. Everything else is a permanent rejection.
pub const fn is_retryable(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

fn apply_jitter(duration: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return duration;
    }
    let jitter = jitter.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * jitter;
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[tokio::test]
async fn delay_sequence_doubles_until_cap() -> anyhow::Result<()> {
    // arrange
    let policy = RetryPolicy {
        initial_delay: Duration::from_millis(1000),
        multiplier: 2,
        max_delay: Duration::from_millis(300_000),
        jitter: 0.0,
    };
    // act
    let delays: Vec<u128> = (1..=10).map(|k| policy.delay(k).as_millis()).collect();
    // assert
    assert_eq!(
        vec![1000, 2000, 4000, 8000, 16000, 32000, 64000, 128_000, 256_000, 300_000],
        delays
    );
    Ok(())
}

#[tokio::test]
async fn delay_is_monotonic() -> anyhow::Result<()> {
    // arrange
    let policy = RetryPolicy::default();
    // act & assert
    for k in 2..=40 {
        assert!(policy.delay(k) >= policy.delay(k - 1));
        assert!(policy.delay(k) <= policy.max_delay);
    }
    Ok(())
}

#[tokio::test]
async fn delay_large_attempt_stays_capped() -> anyhow::Result<()> {
    // arrange
    let policy = RetryPolicy::default();
    // act & assert
    assert_eq!(policy.max_delay, policy.delay(1000));
    assert_eq!(policy.max_delay, policy.delay(u32::MAX));
    Ok(())
}

#[tokio::test]
async fn jitter_stays_within_bounds() -> anyhow::Result<()> {
    // arrange
    let policy = RetryPolicy::default();
    // act & assert
    for _ in 0..100 {
        let scheduled = policy.next_attempt_in(3);
        let base = policy.delay(3).as_secs_f64();
        // from_secs_f64 rounds to nanoseconds
        assert!(scheduled.as_secs_f64() >= base * 0.8 - 1e-6);
        assert!(scheduled.as_secs_f64() <= base * 1.2 + 1e-6);
        assert!(scheduled <= policy.max_delay);
    }
    Ok(())
}

#[tokio::test]
async fn retryable_status_set() -> anyhow::Result<()> {
    // act & assert
    for status in [408, 429, 500, 502, 503, 504] {
        assert!(is_retryable(status));
    }
    for status in [200, 201, 204, 301, 400, 401, 403, 404, 410, 422, 501] {
        assert!(!is_retryable(status));
    }
    Ok(())
}
