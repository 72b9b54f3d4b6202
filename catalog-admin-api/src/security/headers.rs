//! Security headers and CORS for HTTP responses
//!
//! Every response leaving the pipeline carries the same fixed header set,
//! whatever its status. CORS headers are added only when the request's
//! `Origin` is on the configured allow-list.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};

/// HSTS max age: one year
const HSTS_MAX_AGE: u64 = 31_536_000;

const CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

/// Content Security Policy directives
#[derive(Debug, Clone)]
pub struct ContentSecurityPolicy {
    pub default_src: Vec<String>,
    pub script_src: Vec<String>,
    pub style_src: Vec<String>,
    pub img_src: Vec<String>,
    pub connect_src: Vec<String>,
    pub frame_ancestors: Vec<String>,
    pub form_action: Vec<String>,
    pub base_uri: Vec<String>,
    pub object_src: Vec<String>,
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl ContentSecurityPolicy {
    /// Restrictive policy for an admin API that serves no markup
    pub fn strict() -> Self {
        let only = |v: &str| vec![v.to_string()];
        Self {
            default_src: only("'self'"),
            script_src: only("'self'"),
            style_src: only("'self'"),
            img_src: vec!["'self'".to_string(), "data:".to_string()],
            connect_src: only("'self'"),
            frame_ancestors: only("'none'"),
            form_action: only("'self'"),
            base_uri: only("'self'"),
            object_src: only("'none'"),
        }
    }

    /// Convert to CSP header value
    pub fn to_header_value(&self) -> String {
        [
            ("default-src", &self.default_src),
            ("script-src", &self.script_src),
            ("style-src", &self.style_src),
            ("img-src", &self.img_src),
            ("connect-src", &self.connect_src),
            ("frame-ancestors", &self.frame_ancestors),
            ("form-action", &self.form_action),
            ("base-uri", &self.base_uri),
            ("object-src", &self.object_src),
        ]
        .iter()
        .filter(|(_, sources)| !sources.is_empty())
        .map(|(directive, sources)| format!("{} {}", directive, sources.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
    }
}

/// The fixed header set applied to every response
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: HeaderMap,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new(&ContentSecurityPolicy::strict())
    }
}

impl SecurityHeaders {
    pub fn new(csp: &ContentSecurityPolicy) -> Self {
        let mut headers = HeaderMap::new();

        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        );
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        if let Ok(value) = HeaderValue::from_str(&csp.to_header_value()) {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
        if let Ok(value) =
            HeaderValue::from_str(&format!("max-age={}; includeSubDomains", HSTS_MAX_AGE))
        {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));

        Self { headers }
    }

    /// Overwrite the fixed headers on a response
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins (scheme, host and port) allowed to call the API
    pub allowed_origins: Vec<String>,
    /// Preflight cache lifetime in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn with_origins(origins: Vec<String>) -> Self {
        Self {
            allowed_origins: origins,
            ..Default::default()
        }
    }
}

/// Allow-list CORS policy. Unknown origins get no CORS headers at all.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    max_age: HeaderValue,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(&CorsConfig::default())
    }
}

impl CorsPolicy {
    const ALLOWED_METHODS: &'static str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
    const ALLOWED_HEADERS: &'static str =
        "authorization, content-type, accept, x-csrf-token, x-request-id";
    const EXPOSED_HEADERS: &'static str =
        "x-request-id, x-ratelimit-limit, x-ratelimit-remaining, x-ratelimit-reset, retry-after";

    pub fn new(config: &CorsConfig) -> Self {
        Self {
            allowed_origins: config
                .allowed_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// Add CORS headers when `request_headers` carry an allow-listed origin.
    /// Preflight answers additionally advertise the cache lifetime.
    pub fn apply(&self, method: &Method, request_headers: &HeaderMap, target: &mut HeaderMap) {
        let Some(origin) = request_headers.get(header::ORIGIN) else {
            return;
        };
        let allowed = origin
            .to_str()
            .map(|o| self.is_allowed(o))
            .unwrap_or(false);
        if !allowed {
            return;
        }

        target.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        target.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        target.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(Self::ALLOWED_METHODS),
        );
        target.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(Self::ALLOWED_HEADERS),
        );
        target.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(Self::EXPOSED_HEADERS),
        );
        target.append(header::VARY, HeaderValue::from_static("origin"));

        if method == Method::OPTIONS {
            target.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        }
    }
}
