use std::time::Duration;

use reqwest::{RequestBuilder, Response};

use crate::error::{AiError, Result};

/// Backoff policy for provider calls.
#[derive(Debug, Clone)]
pub struct LlmRetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for LlmRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl LlmRetryConfig {
    /// No retries at all; the first failure is returned.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before `attempt`. A provider `Retry-After` wins over backoff but is
    /// still capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let max_delay = Duration::from_millis(self.max_delay_ms);
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds).min(max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Send a request, retrying transient failures.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed by `send`.
/// Only the connection and the response status are retried; once a successful
/// response is returned its body belongs to the caller.
pub async fn send_with_retry<F>(
    config: &LlmRetryConfig,
    provider: &str,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let error = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => response_to_error(response, provider).await,
            Err(err) => AiError::Http(err),
        };

        if !error.is_retryable() || attempt >= config.max_retries {
            return Err(error);
        }

        attempt += 1;
        let delay = config.delay_for(attempt, error.retry_after());
        tracing::warn!(
            provider,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying provider request"
        );
        tokio::time::sleep(delay).await;
    }
}

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

pub async fn response_to_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    // Provider error bodies can be large; keep the head only.
    const MAX_ERROR_BODY: usize = 512;
    let message = match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}... [truncated]", &body[..cut]),
        None => body,
    };

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message,
        retry_after_secs: retry_after,
    }
}
