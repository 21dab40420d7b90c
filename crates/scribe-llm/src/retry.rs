use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use scribe_core::config::RetryConfig;
use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::GenerationWorker;
use scribe_core::types::GenerationRequest;

/// Wraps a generation worker and retries transient failures with
/// exponential backoff.
pub struct RetryingWorker {
    inner: Box<dyn GenerationWorker>,
    config: RetryConfig,
}

impl RetryingWorker {
    pub fn new(inner: Box<dyn GenerationWorker>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn delay(&self, attempt: u32) -> Duration {
        backoff(attempt, &self.config)
    }
}

/// Status code from a provider error formatted as `HTTP <code> ...`.
fn http_status(message: &str) -> Option<u16> {
    message
        .strip_prefix("HTTP ")?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

/// Rate limits, server errors and transport failures are worth another try.
/// Client errors and unparseable output are not.
fn is_transient(error: &ScribeError) -> bool {
    let ScribeError::Generation(message) = error else {
        return false;
    };
    match http_status(message) {
        Some(status) => status == 408 || status == 429 || status >= 500,
        None => {
            let lower = message.to_ascii_lowercase();
            ["timed out", "timeout", "connection", "connect error"]
                .iter()
                .any(|needle| lower.contains(needle))
        }
    }
}

fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config
        .initial_backoff_ms
        .saturating_mul(1u64 << attempt.min(20))
        .min(config.max_backoff_ms);
    // 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((base as f64 * jitter) as u64)
}

impl GenerationWorker for RetryingWorker {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let max_retries = self.config.max_retries;
            let mut attempt = 0;
            loop {
                let err = match self.inner.generate(request.clone()).await {
                    Ok(text) => return Ok(text),
                    Err(e) => e,
                };
                if attempt >= max_retries || !is_transient(&err) {
                    return Err(err);
                }
                let delay = self.delay(attempt);
                attempt += 1;
                warn!(
                    stage = %request.stage,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient generation failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use scribe_core::types::Stage;

    struct Flaky {
        failures: usize,
        error: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl GenerationWorker for Flaky {
        fn generate(&self, _request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(ScribeError::Generation(self.error.to_string()))
                } else {
                    Ok("ok".to_string())
                }
            })
        }
    }

    fn flaky(failures: usize, error: &'static str) -> (RetryingWorker, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = RetryingWorker::new(
            Box::new(Flaky {
                failures,
                error,
                calls: calls.clone(),
            }),
            RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
        );
        (worker, calls)
    }

    #[test]
    fn test_http_status() {
        assert_eq!(http_status("HTTP 503 Service Unavailable: busy"), Some(503));
        assert_eq!(http_status("HTTP 429: slow down"), Some(429));
        assert_eq!(http_status("error sending request"), None);
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&ScribeError::Generation("HTTP 429 Too Many Requests: slow down".into())));
        assert!(is_transient(&ScribeError::Generation("HTTP 502 Bad Gateway: upstream".into())));
        assert!(is_transient(&ScribeError::Generation("operation timed out".into())));
        assert!(!is_transient(&ScribeError::Generation("HTTP 401 Unauthorized: bad key".into())));
        // a 4xx body mentioning a timeout is still a client error
        assert!(!is_transient(&ScribeError::Generation("HTTP 400 Bad Request: timeout must be positive".into())));
        assert!(!is_transient(&ScribeError::GenerationParse("bad json".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = backoff(8, &config);
        assert!(d.as_millis() <= 6000);
        assert!(d.as_millis() >= 4000);
        assert!(backoff(0, &config).as_millis() <= 1200);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let (worker, calls) = flaky(2, "HTTP 503 Service Unavailable: busy");
        let out = worker
            .generate(GenerationRequest::new(Stage::Writer, "w"))
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (worker, calls) = flaky(usize::MAX, "HTTP 500 Internal Server Error: down");
        let err = worker
            .generate(GenerationRequest::new(Stage::Seo, "s"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (worker, calls) = flaky(usize::MAX, "HTTP 401 Unauthorized: bad key");
        assert!(worker
            .generate(GenerationRequest::new(Stage::Editor, "e"))
            .await
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
