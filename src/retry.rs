//! Generic retry-with-backoff, shared by venue REST calls and the
//! language-model client (§4.4, §7 TransientIO).

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 100, max_delay_ms: 5000, jitter_factor: 0.3 }
    }
}

impl RetryConfig {
    /// Decision-engine LM contract: `attempt·2s` backoff, max 3 attempts (§4.4).
    pub fn for_lm_calls() -> Self {
        Self { max_retries: 3, base_delay_ms: 2000, max_delay_ms: 6000, jitter_factor: 0.0 }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.jitter_factor == 0.0 && self.base_delay_ms % 1000 == 0 {
            // LM contract: linear attempt*2s, not exponential.
            let ms = self.base_delay_ms * attempt.max(1) as u64;
            return Duration::from_millis(ms.min(self.max_delay_ms));
        }
        let raw = self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt)).min(self.max_delay_ms);
        let jitter = (raw as f64 * self.jitter_factor) as i64;
        let delta: i64 = rand::thread_rng().gen_range(-jitter..=jitter);
        let final_ms = (raw as i64 + delta).max(0) as u64;
        Duration::from_millis(final_ms)
    }
}

pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt);
                eprintln!(
                    "{{\"domain\":\"retry\",\"operation\":\"{operation_name}\",\"attempt\":{attempt},\"delay_ms\":{},\"error\":\"{e}\"}}",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Classifies language-model transport failures per the retryable set in §4.4/§6:
/// EOF, timeout, connection reset/refused, no such host, stream error, HTTP 5xx.
pub fn is_retryable_lm_error(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("eof")
        || m.contains("timeout")
        || m.contains("timed out")
        || m.contains("connection reset")
        || m.contains("connection refused")
        || m.contains("no such host")
        || m.contains("stream error")
        || m.contains("internal_error")
        || ["500", "502", "503", "504"].iter().any(|code| m.contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lm_backoff_is_attempt_times_two_seconds() {
        let cfg = RetryConfig::for_lm_calls();
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let cfg = RetryConfig { max_retries: 3, base_delay_ms: 1, max_delay_ms: 2, jitter_factor: 0.0 };
        let mut calls = 0;
        let result: Result<i32> = retry_async(&cfg, "test_op", || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(anyhow::anyhow!("eof"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let cfg = RetryConfig { max_retries: 2, base_delay_ms: 1, max_delay_ms: 2, jitter_factor: 0.0 };
        let mut calls = 0;
        let result: Result<i32> = retry_async(&cfg, "test_op", || {
            calls += 1;
            async { Err(anyhow::anyhow!("stream error")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3); // initial + 2 retries
    }

    #[test]
    fn lm_error_classification_matches_spec_list() {
        assert!(is_retryable_lm_error("connection reset by peer"));
        assert!(is_retryable_lm_error("unexpected EOF"));
        assert!(is_retryable_lm_error("request timed out"));
        assert!(is_retryable_lm_error("no such host"));
        assert!(is_retryable_lm_error("HTTP 503 Service Unavailable"));
        assert!(!is_retryable_lm_error("invalid api key"));
    }

    #[test]
    fn http_error_classification() {
        assert!(is_retryable_http_error(503));
        assert!(is_retryable_http_error(429));
        assert!(!is_retryable_http_error(400));
        assert!(!is_retryable_http_error(401));
    }
}
