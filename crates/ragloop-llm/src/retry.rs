use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use ragloop_core::config::{ModelConfig, RetryConfig};
use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::{ChatOptions, LlmClient};
use ragloop_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative models.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &RagError) -> bool {
    match e {
        RagError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        RagError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        turns: Vec<ConversationTurn>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self
                    .primary
                    .chat_stream(&config, turns.clone(), options)
                    .await
                {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.chat_stream(fb_config, turns.clone(), options).await {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| RagError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails with the given error for the first `failures` calls, then
    /// streams a single text delta.
    struct Flaky {
        failures: usize,
        error: fn() -> RagError,
        calls: Arc<AtomicUsize>,
    }

    impl LlmClient for Flaky {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _turns: Vec<ConversationTurn>,
            _options: ChatOptions,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.failures {
                    return Err((self.error)());
                }
                let stream = futures::stream::iter(vec![Ok(StreamDelta::TextDelta("ok".into()))]);
                Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    fn model() -> ModelConfig {
        ragloop_core::AppConfig::from_toml("[model]\nmodel_id = \"m\"\n")
            .unwrap()
            .model
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        let d = calculate_backoff(9, &config);
        assert!(d <= Duration::from_millis(1200));
        assert!(d >= Duration::from_millis(800));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&RagError::LlmRequest("HTTP 429 Too Many Requests".into())));
        assert!(is_retryable(&RagError::LlmStream("eof".into())));
        assert!(!is_retryable(&RagError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&RagError::Config("x".into())));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 2,
                error: || RagError::LlmRequest("HTTP 503".into()),
                calls: calls.clone(),
            }),
            vec![],
            fast_retry(),
        );
        let result = client
            .chat_stream(&model(), vec![], ChatOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_falls_back_after_permanent_error() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: usize::MAX,
                error: || RagError::LlmRequest("HTTP 401".into()),
                calls: primary_calls.clone(),
            }),
            vec![(
                model(),
                Box::new(Flaky {
                    failures: 0,
                    error: || RagError::LlmRequest("unused".into()),
                    calls: fallback_calls.clone(),
                }) as Box<dyn LlmClient>,
            )],
            fast_retry(),
        );
        let result = client
            .chat_stream(&model(), vec![], ChatOptions::default())
            .await;
        assert!(result.is_ok());
        // Non-retryable: exactly one primary attempt
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_everything_fails() {
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: usize::MAX,
                error: || RagError::LlmRequest("HTTP 500".into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            vec![],
            fast_retry(),
        );
        let err = client
            .chat_stream(&model(), vec![], ChatOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::LlmRequest(m) if m.contains("500")));
    }
}
