use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Longest single wait, however many attempts are configured.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Exponential backoff: `base * 3^attempt` plus up to a second of jitter,
/// capped at [`MAX_BACKOFF`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
}

/// The last error once every attempt has been used, or the first
/// non-retryable one.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    /// No waiting between attempts. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
        let delay = self
            .base
            .checked_mul(3u32.saturating_pow(attempt))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        delay + jitter
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or attempts run out.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, Exhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let attempts = attempt + 1;
                    if attempts >= self.max_attempts || !retryable(&error) {
                        return Err(Exhausted { attempts, error });
                    }
                    let backoff = self.backoff(attempt);
                    warn!(
                        label,
                        attempt = attempts,
                        backoff_secs = backoff.as_secs_f32(),
                        error = %error,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
