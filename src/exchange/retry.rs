use std::future::Future;

use tokio::time::Duration;

use super::error::{ExchangeError, ExchangeErrorType};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub retry_on_errors: Vec<ExchangeErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            retry_on_errors: vec![
                ExchangeErrorType::NetworkError,
                ExchangeErrorType::TimeoutError,
                ExchangeErrorType::ServerError,
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn retry<F, Fut, T>(&self, operation: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempts = 0;
        let mut delay = self.config.initial_delay;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.should_retry(&error) || attempts >= self.config.max_attempts {
                        return Err(error);
                    }

                    log::warn!(
                        "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempts,
                        self.config.max_attempts,
                        error,
                        delay
                    );

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay.mul_f64(self.config.backoff_factor), self.config.max_delay);
                }
            }
        }
    }

    fn should_retry(&self, error: &ExchangeError) -> bool {
        self.config.retry_on_errors.contains(&error.error_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);

        let result = handler
            .retry(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExchangeError::NetworkError("connection reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_api_errors() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = handler
            .retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::ApiError {
                    endpoint: "/fapi/v1/leverage".into(),
                    code: -4028,
                    message: "Leverage is not valid".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = handler
            .retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExchangeError::TimeoutError(Duration::from_secs(10)))
            })
            .await;

        assert!(matches!(result, Err(ExchangeError::TimeoutError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
