//! Bounded retry with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial try
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A budget of `max_retries` attempts with the default backoff curve.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("max retries ({retries}) exceeded: {source}")]
    MaxRetriesExceeded { retries: u32, source: E },
    #[error("{0}")]
    NotRetryable(E),
}

/// Execute a future, retrying errors the predicate accepts.
///
/// Errors rejected by `retryable` abort immediately; accepted errors are
/// retried up to `config.max_retries` times with exponential backoff.
pub async fn with_retries<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut retryable: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !retryable(&e) => return Err(RetryError::NotRetryable(e)),
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    warn!("Max retries ({}) reached: {}", config.max_retries, e);
                    return Err(RetryError::MaxRetriesExceeded {
                        retries: config.max_retries,
                        source: e,
                    });
                }

                let delay = apply_jitter(backoff, config.jitter);

                warn!(
                    "Retry attempt {}/{} after {}, waiting {:?}",
                    attempt, config.max_retries, e, delay
                );

                tokio::time::sleep(delay).await;

                backoff = Duration::from_millis(
                    ((backoff.as_millis() as f64 * config.backoff_multiplier)
                        .min(config.max_backoff.as_millis() as f64)) as u64,
                );
            }
        }
    }
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor: f64 = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retries(&fast_config(3), |_: &String| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retries(&fast_config(3), |_: &&str| true, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_reports_source() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, _> = with_retries(&fast_config(2), |_: &&str| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err("persistent error") }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { retries: 2, .. })
        ));
        // Initial attempt plus two retries.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_abort_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, _> = with_retries(&fast_config(5), |_: &&str| false, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err("constraint violation") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
