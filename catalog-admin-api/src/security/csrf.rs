//! CSRF protection using the double-submit cookie pattern
//!
//! A token is handed to the client both as a cookie and in the response body;
//! unsafe requests must echo it in the `X-CSRF-Token` header. Tokens are
//! stateless: `base36(issued_at_millis) + "." + hex(16 random bytes)`, and are
//! rejected once older than the configured maximum age (one hour by default).

use std::time::Duration;

use axum::http::{header, HeaderMap, Method};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Header carrying the submitted token
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Cookie carrying the issued token
pub const CSRF_COOKIE: &str = "csrf_token";

/// Tokens older than this are rejected
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(3600);

const RANDOM_BYTES: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub max_age_secs: u64,
    pub header_name: String,
    pub cookie_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_TOKEN_MAX_AGE.as_secs(),
            header_name: CSRF_HEADER.to_string(),
            cookie_name: CSRF_COOKIE.to_string(),
        }
    }
}

/// Reasons a request failed CSRF verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("missing CSRF token header")]
    MissingHeader,
    #[error("missing CSRF token cookie")]
    MissingCookie,
    #[error("CSRF header and cookie tokens differ")]
    Mismatch,
    #[error("malformed CSRF token")]
    Malformed,
    #[error("CSRF token expired")]
    Expired,
}

/// Stateless double-submit token guard
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    max_age: Duration,
    header_name: String,
    cookie_name: String,
}

impl Default for CsrfGuard {
    fn default() -> Self {
        Self::new(&CsrfConfig::default())
    }
}

impl CsrfGuard {
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            max_age: Duration::from_secs(config.max_age_secs),
            header_name: config.header_name.to_ascii_lowercase(),
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Safe methods always pass; anything else needs two equal tokens.
    pub fn validate_token(
        &self,
        method: &Method,
        header_token: Option<&str>,
        cookie_token: Option<&str>,
    ) -> bool {
        if is_safe_method(method) {
            return true;
        }

        match (header_token, cookie_token) {
            (Some(header), Some(cookie)) => tokens_equal(header, cookie),
            _ => false,
        }
    }

    /// Generate a fresh token stamped with the current time
    pub fn issue_token(&self) -> String {
        let mut bytes = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!(
            "{}.{}",
            encode_base36(Utc::now().timestamp_millis().max(0) as u64),
            hex::encode(bytes)
        )
    }

    pub fn is_well_formed(&self, token: &str) -> bool {
        self.check_age(token, Utc::now().timestamp_millis()).is_ok()
    }

    /// Full check used by the request pipeline: presence, equality and age.
    pub fn verify(
        &self,
        method: &Method,
        header_token: Option<&str>,
        cookie_token: Option<&str>,
    ) -> Result<(), CsrfError> {
        self.verify_at(method, header_token, cookie_token, Utc::now().timestamp_millis())
    }

    pub fn verify_at(
        &self,
        method: &Method,
        header_token: Option<&str>,
        cookie_token: Option<&str>,
        now_ms: i64,
    ) -> Result<(), CsrfError> {
        if is_safe_method(method) {
            return Ok(());
        }

        let header = header_token
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::MissingHeader)?;
        let cookie = cookie_token
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::MissingCookie)?;

        if !tokens_equal(header, cookie) {
            return Err(CsrfError::Mismatch);
        }

        self.check_age(header, now_ms)
    }

    /// Reads the header and cookie tokens from a request
    pub fn verify_headers(&self, method: &Method, headers: &HeaderMap) -> Result<(), CsrfError> {
        let header_token = headers
            .get(self.header_name.as_str())
            .and_then(|h| h.to_str().ok());
        let cookie_token = extract_cookie(headers, &self.cookie_name);

        self.verify(method, header_token, cookie_token.as_deref())
    }

    fn check_age(&self, token: &str, now_ms: i64) -> Result<(), CsrfError> {
        let (timestamp, payload) = token.split_once('.').ok_or(CsrfError::Malformed)?;
        if timestamp.is_empty() || payload.is_empty() {
            return Err(CsrfError::Malformed);
        }

        let issued_ms = decode_base36(timestamp).ok_or(CsrfError::Malformed)?;
        let age_ms = now_ms.saturating_sub(issued_ms as i64);

        if age_ms > self.max_age.as_millis() as i64 {
            return Err(CsrfError::Expired);
        }

        Ok(())
    }

    /// `Set-Cookie` value that hands a token to the browser. Not HttpOnly:
    /// the client script must read it back into the header.
    pub fn set_cookie_value(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; SameSite=Strict; Secure; Max-Age={}",
            self.cookie_name,
            token,
            self.max_age.as_secs()
        )
    }
}

/// GET, HEAD and OPTIONS never need a token
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn tokens_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Find a cookie value by name in the `Cookie` header
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| value.to_string())
        })
}

fn encode_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn decode_base36(input: &str) -> Option<u64> {
    u64::from_str_radix(input, 36).ok()
}
