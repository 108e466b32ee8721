use crate::application::ports::PageLoader;
use crate::shared::{AppError, RetryConfig};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Success {
        value: T,
        attempts: u32,
    },
    Failure {
        error: AppError,
        attempts: u32,
        is_retryable: bool,
    },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn into_result(self) -> Result<T, AppError> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { error, .. } => Err(error),
        }
    }
}

/// 指数バックオフ付きの再試行ポリシー
///
/// 共有状態を持たないので、同じポリシーを複数のタスクから同時に使ってよい。
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `operation` を試行番号（1 始まり）付きで呼び出す。
    ///
    /// 再試行不可のエラーは残り回数に関係なく即座に失敗を返す。
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let is_retryable = error.is_retryable();
                    if attempt >= max_attempts || !is_retryable {
                        warn!(
                            attempt,
                            max_attempts,
                            is_retryable,
                            error = %error,
                            "operation failed"
                        );
                        return RetryOutcome::Failure {
                            error,
                            attempts: attempt,
                            is_retryable,
                        };
                    }

                    let delay = self.config.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "{}",
                        retry_message(attempt + 1, max_attempts)
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

pub async fn execute_with_retry<T, F, Fut>(config: RetryConfig, operation: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    RetryPolicy::new(config).execute(operation).await
}

pub fn should_retry(error: &AppError, attempt: u32, max_attempts: u32) -> bool {
    attempt < max_attempts && error.is_retryable()
}

pub fn retry_message(attempt: u32, max_attempts: u32) -> String {
    format!("Retrying... (attempt {attempt} of {max_attempts})")
}

/// ページ取得を再試行ポリシー経由で行う `PageLoader`
pub struct RetryingPageLoader<T> {
    inner: Arc<dyn PageLoader<T>>,
    policy: RetryPolicy,
}

impl<T> RetryingPageLoader<T> {
    pub fn new(inner: Arc<dyn PageLoader<T>>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: Send + 'static> PageLoader<T> for RetryingPageLoader<T> {
    async fn load_page(&self, page: usize, page_size: usize) -> Result<Vec<T>, AppError> {
        self.policy
            .execute(|_| self.inner.load_page(page, page_size))
            .await
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ValidationFailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn network_timeout_exhausts_attempts_with_backoff() {
        let started = Instant::now();
        let attempt_times = Mutex::new(Vec::new());
        let recorder = &attempt_times;

        let outcome: RetryOutcome<()> = execute_with_retry(RetryConfig::default(), |_| async move {
            recorder.lock().await.push(Instant::now());
            Err(AppError::from_message("network timeout"))
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Failure {
                attempts: 3,
                is_retryable: true,
                ..
            }
        ));

        let times = attempt_times.into_inner();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0] - started, Duration::ZERO);
        assert_eq!(times[1] - times[0], Duration::from_millis(1000));
        assert_eq!(times[2] - times[1], Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(RetryConfig::default(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(AppError::Network("connection refused".into()))
                } else {
                    Ok(attempt * 10)
                }
            }
        })
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 20,
                attempts: 2
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let outcome: RetryOutcome<()> = execute_with_retry(RetryConfig::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::validation(
                    ValidationFailureKind::AlreadyVoted,
                    "already voted",
                ))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now() - started, Duration::ZERO);
        assert!(matches!(
            outcome,
            RetryOutcome::Failure {
                attempts: 1,
                is_retryable: false,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_not_auto_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = execute_with_retry(RetryConfig::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_message("Rate limit exceeded, wait 3 minutes")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = outcome.into_result().expect_err("rate limit surfaces");
        assert_eq!(err.retry_after_minutes(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_capped_at_max() {
        let config = RetryConfig {
            max_attempts: 5,
            ..RetryConfig::default()
        };
        let started = Instant::now();
        let outcome: RetryOutcome<()> = execute_with_retry(config, |_| async {
            Err(AppError::Timeout("deadline".into()))
        })
        .await;

        assert_eq!(outcome.attempts(), 5);
        // 1000 + 2000 + 4000 + 4000
        assert_eq!(Instant::now() - started, Duration::from_millis(11_000));
    }

    #[test]
    fn should_retry_respects_budget_and_classification() {
        let network = AppError::Network("down".into());
        assert!(should_retry(&network, 1, 3));
        assert!(!should_retry(&network, 3, 3));
        assert!(!should_retry(&AppError::Internal("boom".into()), 1, 3));
        assert_eq!(retry_message(2, 3), "Retrying... (attempt 2 of 3)");
    }

    struct FlakyLoader {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl PageLoader<u32> for FlakyLoader {
        async fn load_page(&self, page: usize, page_size: usize) -> Result<Vec<u32>, AppError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Network("connection reset".into()));
            }
            Ok((0..page_size as u32).map(|i| page as u32 * 100 + i).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_page_loader_recovers_transient_failures() {
        let loader = RetryingPageLoader::new(
            Arc::new(FlakyLoader {
                failures_left: AtomicU32::new(2),
            }),
            RetryPolicy::default(),
        );

        let page = loader.load_page(1, 3).await.expect("third attempt succeeds");
        assert_eq!(page, vec![100, 101, 102]);
    }
}
