use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Bounded attempts with a delay between them.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. At least 1.
    pub attempts: u32,
    step: Duration,
    delay: fn(Duration, u32) -> Duration,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("step", &self.step)
            .finish()
    }
}

fn linear_delay(step: Duration, failed_attempt: u32) -> Duration {
    step * failed_attempt
}

fn exponential_delay(base: Duration, failed_attempt: u32) -> Duration {
    base * 2u32.saturating_pow(failed_attempt.saturating_sub(1))
}

impl RetryPolicy {
    /// Wait `n * step` after the n-th failed attempt.
    pub fn linear(attempts: u32, step: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step,
            delay: linear_delay,
        }
    }

    /// Wait `base * 2^(n-1)` after the n-th failed attempt.
    pub fn exponential(attempts: u32, base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            step: base,
            delay: exponential_delay,
        }
    }

    /// Delay before the attempt that follows failed attempt `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        (self.delay)(self.step, failed_attempt)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, waiting 1s then 2s.
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy's attempts are used up. `op` receives the 1-based attempt.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && is_retryable(&err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
