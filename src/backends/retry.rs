use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const MAX_RETRIES: usize = 5;
const BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
        || lower.contains("overloaded")
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Exponential backoff for rate-limited backend calls.
pub(crate) struct Backoff {
    backend: &'static str,
    attempt: usize,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new(backend: &'static str) -> Self {
        Self {
            backend,
            attempt: 0,
            delay: BASE_DELAY,
        }
    }

    /// Sleep before the next attempt; false once attempts are exhausted.
    pub(crate) async fn wait(&mut self, headers: &HeaderMap) -> bool {
        self.attempt += 1;
        if self.attempt >= MAX_RETRIES {
            return false;
        }
        let mut wait = self.delay;
        if let Some(requested) = retry_after(headers)
            && requested > wait
        {
            wait = requested;
        }
        warn!(
            "{} rate limited; retrying in {:.1}s (attempt {}/{})",
            self.backend,
            wait.as_secs_f32(),
            self.attempt,
            MAX_RETRIES
        );
        sleep(wait).await;
        self.delay = Duration::from_secs(
            self.delay
                .as_secs()
                .saturating_mul(2)
                .min(MAX_DELAY.as_secs()),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_responses() {
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_rate_limited(
            StatusCode::SERVICE_UNAVAILABLE,
            "try later"
        ));
        assert!(is_rate_limited(StatusCode::BAD_REQUEST, "quota exceeded"));
        assert!(!is_rate_limited(StatusCode::BAD_REQUEST, "invalid input"));
    }
}
