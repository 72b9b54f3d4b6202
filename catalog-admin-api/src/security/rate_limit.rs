//! Fixed-window rate limiting
//!
//! Requests are counted in discrete, non-overlapping buckets of
//! `floor(now / window)`. State lives in a sharded `DashMap` keyed by
//! `(identifier, bucket)`, so increments for one key are serialized by the
//! shard lock while unrelated keys proceed in parallel. Expired buckets are
//! dropped by [`RateLimiter::sweep_expired`], which a supervised background
//! task calls every five minutes.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use catalog_admin_core::domain::PrincipalId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// How often expired buckets are swept
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for a fixed-window limit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Limit applied to admin routes unless overridden
    pub fn admin_default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// Tighter limit for token issuance and other unauthenticated routes
    pub fn strict() -> Self {
        Self::new(20, Duration::from_secs(60))
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::admin_default()
    }
}

/// Information about the current rate limit status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Number of requests remaining in the current window
    pub remaining: u32,
    /// Total limit for the current window
    pub limit: u32,
    /// When the current window closes
    pub reset_at: DateTime<Utc>,
}

/// Rate limit error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many requests. Retry after {retry_after:?}")]
    TooManyRequests {
        retry_after: Duration,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
}

impl RateLimitError {
    pub fn retry_after(&self) -> Duration {
        match self {
            RateLimitError::TooManyRequests { retry_after, .. } => *retry_after,
        }
    }

    pub fn limit(&self) -> u32 {
        match self {
            RateLimitError::TooManyRequests { limit, .. } => *limit,
        }
    }

    /// Whole seconds until the window resets, never less than one
    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.retry_after().as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Composite identifiers a limit can be keyed by
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Applies to every request
    Global,
    /// Rate limit by IP address
    ByIp(IpAddr),
    /// Rate limit by authenticated principal
    ByPrincipal(PrincipalId),
    /// Client identifier scoped to a route
    Scoped { client: String, scope: String },
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Global => write!(f, "global"),
            RateLimitKey::ByIp(ip) => write!(f, "ip:{}", ip),
            RateLimitKey::ByPrincipal(id) => write!(f, "principal:{}", id),
            RateLimitKey::Scoped { client, scope } => {
                write!(f, "client:{}:scope:{}", client, scope)
            }
        }
    }
}

/// Counter for one `(identifier, bucket)` pair
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_reset_at_ms: i64,
}

/// Fixed-window rate limiter.
///
/// Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<DashMap<(String, i64), WindowCounter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while fewer than `max_requests` calls have been made
    /// for `identifier` in the current window.
    pub fn allow(&self, identifier: &str, max_requests: u32, window: Duration) -> bool {
        self.check_at(
            identifier,
            max_requests,
            window.as_millis() as u64,
            Utc::now().timestamp_millis(),
        )
        .is_ok()
    }

    /// Check and count a request for the given key
    pub fn check(
        &self,
        key: &RateLimitKey,
        config: &RateLimitConfig,
    ) -> Result<RateLimitInfo, RateLimitError> {
        self.check_at(
            &key.to_string(),
            config.max_requests,
            config.window_ms,
            Utc::now().timestamp_millis(),
        )
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: u64,
        now_ms: i64,
    ) -> Result<RateLimitInfo, RateLimitError> {
        let window_ms = window_ms.max(1) as i64;
        let bucket = now_ms.div_euclid(window_ms);
        let window_reset_at_ms = (bucket + 1) * window_ms;
        let reset_at = millis_to_datetime(window_reset_at_ms);

        let rejected = || RateLimitError::TooManyRequests {
            retry_after: Duration::from_millis((window_reset_at_ms - now_ms).max(0) as u64),
            limit: max_requests,
            reset_at,
        };

        if max_requests == 0 {
            return Err(rejected());
        }

        let mut entry = self
            .buckets
            .entry((identifier.to_string(), bucket))
            .or_insert(WindowCounter {
                count: 0,
                window_reset_at_ms,
            });
        let counter = entry.value_mut();

        // Saturate: a rejected call does not move the counter
        if counter.count >= max_requests {
            return Err(rejected());
        }

        counter.count += 1;
        Ok(RateLimitInfo {
            remaining: max_requests - counter.count,
            limit: max_requests,
            reset_at,
        })
    }

    /// Remove buckets whose window has closed. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now().timestamp_millis())
    }

    pub fn sweep_expired_at(&self, now_ms: i64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, counter| counter.window_reset_at_ms > now_ms);
        let removed = before.saturating_sub(self.buckets.len());

        tracing::debug!(
            removed,
            active = self.buckets.len(),
            "Rate limiter sweep complete"
        );
        removed
    }

    /// Get the number of active buckets (for monitoring)
    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Add rate limit headers to a response
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(info.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(info.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(info.reset_at.timestamp()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const MINUTE_MS: u64 = 60_000;

    #[test]
    fn test_rate_limit_config_presets() {
        let admin = RateLimitConfig::admin_default();
        assert_eq!(admin.max_requests, 100);
        assert_eq!(admin.window(), Duration::from_secs(60));

        let strict = RateLimitConfig::strict();
        assert!(strict.max_requests < admin.max_requests);
    }

    #[test]
    fn test_rate_limit_key_display() {
        let ip_key = RateLimitKey::ByIp(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(ip_key.to_string(), "ip:127.0.0.1");

        let id = PrincipalId::new();
        assert_eq!(RateLimitKey::ByPrincipal(id).to_string(), format!("principal:{}", id));

        let scoped = RateLimitKey::Scoped {
            client: "10.0.0.1".to_string(),
            scope: "/products".to_string(),
        };
        assert_eq!(scoped.to_string(), "client:10.0.0.1:scope:/products");
        assert_eq!(RateLimitKey::Global.to_string(), "global");
    }

    #[test]
    fn test_allows_exactly_max_requests() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000_000;

        for i in 0..5 {
            let info = limiter.check_at("client", 5, MINUTE_MS, now).unwrap();
            assert_eq!(info.remaining, 4 - i);
        }

        assert!(limiter.check_at("client", 5, MINUTE_MS, now).is_err());
    }

    #[test]
    fn test_rejection_does_not_increment() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000_000;

        for _ in 0..2 {
            limiter.check_at("client", 2, MINUTE_MS, now).unwrap();
        }
        for _ in 0..10 {
            assert!(limiter.check_at("client", 2, MINUTE_MS, now).is_err());
        }

        let counter = limiter
            .buckets
            .iter()
            .map(|entry| entry.value().count)
            .max()
            .unwrap();
        assert_eq!(counter, 2);
    }

    #[test]
    fn test_window_reset_restores_allowance() {
        let limiter = RateLimiter::new();
        let window_start = 1_700_000_040_000; // aligned to a minute boundary

        for _ in 0..3 {
            assert!(limiter.check_at("client", 3, MINUTE_MS, window_start).is_ok());
        }
        assert!(limiter.check_at("client", 3, MINUTE_MS, window_start + 59_999).is_err());

        // First millisecond of the next window
        assert!(limiter.check_at("client", 3, MINUTE_MS, window_start + 60_000).is_ok());
    }

    #[test]
    fn test_retry_after_reports_remaining_window() {
        let limiter = RateLimiter::new();
        let window_start = 1_700_000_040_000;

        limiter.check_at("client", 1, MINUTE_MS, window_start).unwrap();
        let err = limiter
            .check_at("client", 1, MINUTE_MS, window_start + 15_500)
            .unwrap_err();

        assert_eq!(err.retry_after(), Duration::from_millis(44_500));
        assert_eq!(err.retry_after_secs(), 45);
    }

    #[test]
    fn test_zero_max_rejects_everything() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at("client", 0, MINUTE_MS, 0).is_err());
        assert_eq!(limiter.active_buckets(), 0);
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at("client", 1, 0, 10).is_ok());
        assert!(limiter.check_at("client", 1, 0, 10).is_err());
        assert!(limiter.check_at("client", 1, 0, 11).is_ok());
    }

    #[test]
    fn test_different_keys_independent() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000_000;

        assert!(limiter.check_at("a", 1, MINUTE_MS, now).is_ok());
        assert!(limiter.check_at("a", 1, MINUTE_MS, now).is_err());
        assert!(limiter.check_at("b", 1, MINUTE_MS, now).is_ok());
    }

    #[test]
    fn test_sweep_removes_only_expired_buckets() {
        let limiter = RateLimiter::new();
        let window_start = 1_700_000_040_000;

        limiter.check_at("old", 10, MINUTE_MS, window_start).unwrap();
        limiter
            .check_at("current", 10, MINUTE_MS, window_start + 60_000)
            .unwrap();
        assert_eq!(limiter.active_buckets(), 2);

        let removed = limiter.sweep_expired_at(window_start + 60_000);
        assert_eq!(removed, 1);
        assert_eq!(limiter.active_buckets(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let limiter = RateLimiter::new();
        let now = 1_700_000_000_000;
        let allowed = std::sync::atomic::AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if limiter.check_at("shared", 250, MINUTE_MS, now).is_ok() {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(std::sync::atomic::Ordering::Relaxed), 250);
    }

    #[test]
    fn test_allow_uses_wall_clock() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("client", 1, Duration::from_secs(3600)));
        assert!(!limiter.allow("client", 1, Duration::from_secs(3600)));
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        let reset_at = millis_to_datetime(1_700_000_060_000);
        apply_rate_limit_headers(
            &mut headers,
            &RateLimitInfo {
                remaining: 7,
                limit: 10,
                reset_at,
            },
        );

        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert_eq!(headers["x-ratelimit-remaining"], "7");
        assert_eq!(headers["x-ratelimit-reset"], "1700000060");
    }
}
