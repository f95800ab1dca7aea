//! Shared outbound call policy: timeouts, transient/permanent classification,
//! exponential backoff with jitter, and retry-after honoring.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use ticketbridge_shared::{AppError, ErrorCode};

use crate::metrics;
use crate::ratelimit::TokenBucket;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transient upstream failure (status {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("permanent upstream failure (status {status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("resource not found: {message}")]
    NotFound { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("response decode failed: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Label for `api_calls_total{status}`: the HTTP status when one was
    /// seen, otherwise the failure kind.
    pub fn status_label(&self) -> String {
        match self {
            Self::Transient { status: Some(s), .. } | Self::Permanent { status: s, .. } => {
                s.to_string()
            }
            Self::Transient { status: None, .. } => "network_error".to_string(),
            Self::NotFound { .. } => "404".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::Decode(_) => "decode_error".to_string(),
        }
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        let code = match &err {
            ApiError::Transient { .. } => ErrorCode::UpstreamTransient,
            ApiError::Timeout => ErrorCode::Timeout,
            ApiError::Permanent { .. } | ApiError::NotFound { .. } | ApiError::Decode(_) => {
                ErrorCode::UpstreamPermanent
            }
        };
        AppError::new(code, err.to_string())
    }
}

/// Classify an HTTP response status per the shared call policy: 408/429 and
/// 5xx (except 501/505) are transient, 404 is a vanished resource, all other
/// 4xx are terminal.
pub fn classify_status(status: u16, message: String, retry_after: Option<Duration>) -> ApiError {
    match status {
        404 => ApiError::NotFound { message },
        408 | 429 => ApiError::Transient {
            status: Some(status),
            message,
            retry_after,
        },
        s if s >= 500 && s != 501 && s != 505 => ApiError::Transient {
            status: Some(s),
            message,
            retry_after,
        },
        s => ApiError::Permanent { status: s, message },
    }
}

pub fn classify_transport_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transient {
            status: None,
            message: err.to_string(),
            retry_after: None,
        }
    }
}

pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Retry schedule: up to `max_attempts`, exponential backoff with ±20%
/// jitter, capped per wait.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(250),
            cap: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl CallPolicy {
    /// Deterministic backoff for attempt `n` (1-based), before jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt).as_secs_f64();
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(raw * factor)
    }
}

/// Run `call` under the retry policy, pacing each attempt through the
/// provider's token bucket and recording one `api_calls_total` sample per
/// attempt. Transient failures retry; everything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &CallPolicy,
    bucket: &TokenBucket,
    provider: &str,
    op: &str,
    call: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1u32;
    loop {
        bucket.acquire().await;
        let start = Instant::now();
        let result = call().await;
        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(value) => {
                metrics::api_call(provider, op, "ok", duration);
                tracing::info!(
                    provider = provider,
                    op = op,
                    attempt = attempt,
                    duration_secs = duration,
                    status = "ok",
                    "outbound call"
                );
                return Ok(value);
            }
            Err(err) => {
                let status = err.status_label();
                metrics::api_call(provider, op, &status, duration);
                tracing::warn!(
                    provider = provider,
                    op = op,
                    attempt = attempt,
                    duration_secs = duration,
                    status = %status,
                    error = %err,
                    "outbound call failed"
                );

                if !err.should_retry() || attempt >= policy.max_attempts {
                    return Err(err);
                }

                // A provider retry-after hint is a floor on the wait.
                let mut delay = policy.jittered_delay(attempt);
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn transient_statuses() {
        assert!(classify_status(408, String::new(), None).should_retry());
        assert!(classify_status(429, String::new(), None).should_retry());
        assert!(classify_status(500, String::new(), None).should_retry());
        assert!(classify_status(503, String::new(), None).should_retry());
    }

    #[test]
    fn permanent_statuses() {
        assert!(!classify_status(400, String::new(), None).should_retry());
        assert!(!classify_status(403, String::new(), None).should_retry());
        assert!(!classify_status(501, String::new(), None).should_retry());
        assert!(!classify_status(505, String::new(), None).should_retry());
    }

    #[test]
    fn not_found_is_its_own_kind() {
        let err = classify_status(404, "gone".into(), None);
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert!(!err.should_retry());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = CallPolicy::default();
        assert_eq!(policy.raw_delay(1), Duration::from_millis(250));
        assert_eq!(policy.raw_delay(2), Duration::from_millis(500));
        assert_eq!(policy.raw_delay(3), Duration::from_millis(1000));
        assert_eq!(policy.raw_delay(4), Duration::from_millis(2000));
        assert_eq!(policy.raw_delay(5), Duration::from_millis(4000));
        assert_eq!(policy.raw_delay(6), Duration::from_secs(8));
        assert_eq!(policy.raw_delay(60), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = CallPolicy::default();
        for _ in 0..100 {
            let d = policy.jittered_delay(3).as_secs_f64();
            assert!((0.8..=1.2001).contains(&d), "delay out of band: {d}");
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = CallPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
            jitter: 0.0,
        };
        let bucket = TokenBucket::per_minute(100_000);
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, &bucket, "tgt", "update_page", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 4 {
                    Err(ApiError::Transient {
                        status: Some(503),
                        message: "unavailable".into(),
                        retry_after: None,
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let policy = CallPolicy {
            base: Duration::from_millis(1),
            ..CallPolicy::default()
        };
        let bucket = TokenBucket::per_minute(100_000);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, &bucket, "src", "update_issue", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Permanent {
                    status: 403,
                    message: "forbidden".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Permanent { status: 403, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_transient_failure() {
        let policy = CallPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            jitter: 0.0,
        };
        let bucket = TokenBucket::per_minute(100_000);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, &bucket, "tgt", "create_page", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Transient {
                    status: Some(500),
                    message: "boom".into(),
                    retry_after: None,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
