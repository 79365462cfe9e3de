//! Cancellation-aware sleeping and retry with jittered backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outcome of a cancellable sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Completed,
    Cancelled,
}

/// Sleep for `duration`, returning early if the token is cancelled.
pub async fn context_sleep(ctx: &CancellationToken, duration: Duration) -> SleepOutcome {
    tokio::select! {
        _ = ctx.cancelled() => SleepOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => SleepOutcome::Completed,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryOptions {
    /// Defaults for AI calls: few attempts, generous spacing.
    pub fn ai() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Defaults for plain HTTP transport.
    pub fn transport() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before the given retry (1-based): `base * 3^(attempt-1)` plus up
    /// to a second of jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 3u32.saturating_pow(attempt.saturating_sub(1));
        let backoff = self
            .base_delay
            .saturating_mul(exp)
            .min(self.max_delay);
        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
        backoff + jitter
    }
}

/// Run `op` until it succeeds, the error is classified non-retryable, the
/// attempt budget is exhausted, or the token is cancelled during backoff.
pub async fn with_retry<T, E, F, Fut, C>(
    ctx: &CancellationToken,
    opts: RetryOptions,
    retryable: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= opts.max_attempts || !retryable(&err) {
                    return Err(err);
                }
                warn!(attempt, error = %err, "Retrying after error");
                if context_sleep(ctx, opts.delay_for(attempt)).await == SleepOutcome::Cancelled {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn sleep_returns_promptly_on_cancel() {
        let ctx = CancellationToken::new();
        let child = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = context_sleep(&ctx, Duration::from_secs(60)).await;
        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let ctx = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let opts = RetryOptions {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result: Result<u32, String> = with_retry(&ctx, opts, |_| true, || {
            let attempts = seen.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let ctx = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let result: Result<(), String> =
            with_retry(&ctx, RetryOptions::ai(), |e: &String| e != "fatal", || {
                let attempts = seen.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let opts = RetryOptions {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        };
        assert!(opts.delay_for(1) >= Duration::from_secs(2));
        assert!(opts.delay_for(2) >= Duration::from_secs(6));
        // 2s * 3^4 = 162s caps at 30s (+ jitter < 1s).
        assert!(opts.delay_for(5) < Duration::from_secs(31));
    }
}
