//! Rolling-window request quota per caller credential.
//!
//! Each credential keeps the timestamps of its accepted requests within the
//! window. Expired timestamps are dropped lazily on every check. A rejected
//! request is not recorded, so it does not consume quota.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::error::{Result, WebhookError};
use crate::types::RateLimitInfo;

/// Default maximum requests per credential per window.
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// Default window duration in seconds (1 hour).
pub const DEFAULT_WINDOW_SECS: u64 = 3600;

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, credential: &str) -> Result<RateLimitInfo> {
        self.check_at(credential, Utc::now())
    }

    pub fn check_at(&self, credential: &str, now: DateTime<Utc>) -> Result<RateLimitInfo> {
        let window = TimeDelta::from_std(self.config.window).unwrap_or(TimeDelta::hours(1));
        let limit = self.config.max_requests;

        let mut windows = self.windows.lock();
        let entries = windows.entry(credential.to_string()).or_default();

        while entries.front().is_some_and(|t| now - *t >= window) {
            entries.pop_front();
        }

        if entries.len() >= limit {
            let reset_at = entries.front().map_or(now + window, |t| *t + window);
            tracing::debug!(count = entries.len(), limit, %reset_at, "rate limit exceeded");
            return Err(WebhookError::RateLimitExceeded { limit, reset_at });
        }

        entries.push_back(now);
        let oldest = entries.front().copied().unwrap_or(now);
        Ok(RateLimitInfo {
            limit,
            remaining: limit - entries.len(),
            reset_at: oldest + window,
        })
    }

    /// Requests currently counted against `credential`.
    pub fn count(&self, credential: &str) -> usize {
        self.windows.lock().get(credential).map_or(0, VecDeque::len)
    }
}

/// Add `X-RateLimit-*` headers to a response.
pub fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    if let Ok(value) = HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert(HeaderName::from_static(HEADER_LIMIT), value);
    }
    if let Ok(value) = HeaderValue::from_str(&info.remaining.to_string()) {
        headers.insert(HeaderName::from_static(HEADER_REMAINING), value);
    }
    if let Ok(value) = HeaderValue::from_str(&info.reset_at.timestamp().to_string()) {
        headers.insert(HeaderName::from_static(HEADER_RESET), value);
    }
}

/// Convert a limiter error into a response carrying the quota headers.
pub fn rejection(err: WebhookError) -> Response {
    let info = match &err {
        WebhookError::RateLimitExceeded { limit, reset_at } => Some(RateLimitInfo {
            limit: *limit,
            remaining: 0,
            reset_at: *reset_at,
        }),
        _ => None,
    };

    let mut response = err.into_response();
    if let Some(info) = info {
        apply_headers(response.headers_mut(), &info);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(3600),
        })
    }

    #[test]
    fn test_rate_limit_constants() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_counts_down_remaining() {
        let limiter = limiter(3);
        let now = Utc::now();
        assert_eq!(limiter.check_at("key", now).unwrap().remaining, 2);
        assert_eq!(limiter.check_at("key", now).unwrap().remaining, 1);
        let info = limiter.check_at("key", now).unwrap();
        assert_eq!(info.remaining, 0);
        assert_eq!(info.limit, 3);
        assert_eq!(info.reset_at, now + TimeDelta::hours(1));
    }

    #[test]
    fn test_rejection_does_not_consume_quota() {
        let limiter = limiter(2);
        let now = Utc::now();
        limiter.check_at("key", now).unwrap();
        limiter.check_at("key", now).unwrap();
        assert_eq!(limiter.count("key"), 2);

        for _ in 0..5 {
            let err = limiter.check_at("key", now).unwrap_err();
            assert!(matches!(
                err,
                WebhookError::RateLimitExceeded { limit: 2, .. }
            ));
        }
        assert_eq!(limiter.count("key"), 2);
    }

    #[test]
    fn test_reset_is_oldest_entry_expiry() {
        let limiter = limiter(2);
        let start = Utc::now();
        limiter.check_at("key", start).unwrap();
        let info = limiter
            .check_at("key", start + TimeDelta::minutes(10))
            .unwrap();
        assert_eq!(info.reset_at, start + TimeDelta::hours(1));

        match limiter.check_at("key", start + TimeDelta::minutes(20)) {
            Err(WebhookError::RateLimitExceeded { reset_at, .. }) => {
                assert_eq!(reset_at, start + TimeDelta::hours(1));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_window_rolls_forward() {
        let limiter = limiter(1);
        let start = Utc::now();
        limiter.check_at("key", start).unwrap();
        assert!(limiter
            .check_at("key", start + TimeDelta::minutes(59))
            .is_err());

        let info = limiter.check_at("key", start + TimeDelta::hours(1)).unwrap();
        assert_eq!(info.remaining, 0);
        assert_eq!(limiter.count("key"), 1);
    }

    #[test]
    fn test_credentials_are_independent() {
        let limiter = limiter(1);
        let now = Utc::now();
        limiter.check_at("a", now).unwrap();
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_ok());
    }

    #[test]
    fn test_headers_written() {
        let mut headers = HeaderMap::new();
        let reset_at = DateTime::from_timestamp(1_700_003_600, 0).unwrap();
        apply_headers(
            &mut headers,
            &RateLimitInfo {
                limit: 100,
                remaining: 42,
                reset_at,
            },
        );
        assert_eq!(headers["x-ratelimit-limit"], "100");
        assert_eq!(headers["x-ratelimit-remaining"], "42");
        assert_eq!(headers["x-ratelimit-reset"], "1700003600");
    }
}
