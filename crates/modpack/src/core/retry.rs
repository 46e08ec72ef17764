//! Bounded exponential backoff shared by catalog queries and artifact fetches

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_retry::RetryIf;
use tracing::debug;

use crate::config::RetryConfig;
use crate::core::error::Recoverable;
use crate::core::progress::{ProgressCallback, ProgressEvent, emit};

/// Result of a retried operation along with how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: T,
    pub attempts: usize,
}

/// Run `operation` until it succeeds, fails with a non-recoverable error, or
/// the retry budget in `config` is spent
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    subject: &str,
    progress: Option<&ProgressCallback>,
    mut operation: F,
) -> Attempted<Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Recoverable + std::fmt::Display,
{
    let attempts = AtomicUsize::new(0);
    let max_attempts = config.max_retries + 1;

    let result = RetryIf::start(
        config.backoff_schedule(),
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > 1 {
                debug!("Retry attempt {} of {} for {}", attempt, max_attempts, subject);
                emit(
                    progress,
                    ProgressEvent::RetryAttempt {
                        subject: subject.to_string(),
                        attempt,
                        max_attempts,
                    },
                );
            }
            operation()
        },
        |error: &E| {
            let recoverable = error.is_recoverable();
            if recoverable {
                debug!("Recoverable error for {}: {}", subject, error);
            } else {
                debug!("Error is not recoverable for {}, failing immediately: {}", subject, error);
            }
            recoverable
        },
    )
    .await;

    Attempted {
        result,
        attempts: attempts.load(Ordering::Relaxed),
    }
}
