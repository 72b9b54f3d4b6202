//! Security components composed by the request pipeline
//!
//! - Fixed-window rate limiting keyed by client and route
//! - Double-submit CSRF tokens with an age bound
//! - Input sanitization for SQL, markup, traversal, shell and LDAP payloads
//! - Security event ledger with throttling, actor tracking and alerts
//! - JWT session resolution
//! - Schema validation of sanitized bodies
//! - Response security headers and allow-list CORS

pub mod auth;
pub mod csrf;
pub mod headers;
pub mod monitor;
pub mod rate_limit;
pub mod sanitizer;
pub mod validation;

pub use auth::{AuthError, AuthResult, Claims, JwtConfig, JwtSessionResolver};
pub use csrf::{CsrfConfig, CsrfError, CsrfGuard, CSRF_COOKIE, CSRF_HEADER};
pub use headers::{ContentSecurityPolicy, CorsConfig, CorsPolicy, SecurityHeaders};
pub use monitor::{
    LogAlertDispatcher, MonitorConfig, MonitorMetrics, PurgeReport, SecurityMonitor,
    SuspiciousActor,
};
pub use rate_limit::{
    apply_rate_limit_headers, RateLimitConfig, RateLimitError, RateLimitInfo, RateLimitKey,
    RateLimiter,
};
pub use sanitizer::{html_encode, InputSanitizer, SanitizerConfig};
pub use validation::{validate_sku, validate_slug, validation_issues, TypedSchema};
