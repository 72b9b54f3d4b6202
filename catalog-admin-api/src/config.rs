//! Pipeline configuration
//!
//! Every section deserializes with defaults, so a partial file (or none)
//! yields the stock admin settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::security::csrf::CsrfConfig;
pub use crate::security::headers::CorsConfig;
pub use crate::security::monitor::MonitorConfig;
pub use crate::security::rate_limit::RateLimitConfig;
pub use crate::security::sanitizer::SanitizerConfig;

/// JSON bodies above this are rejected with 413
pub const DEFAULT_JSON_LIMIT: usize = 1024 * 1024;

/// Multipart and url-encoded bodies above this are rejected with 413
pub const DEFAULT_FORM_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyLimits {
    pub json_bytes: usize,
    pub form_bytes: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            json_bytes: DEFAULT_JSON_LIMIT,
            form_bytes: DEFAULT_FORM_LIMIT,
        }
    }
}

/// Periods of the background sweepers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub rate_limit_secs: u64,
    pub monitor_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 300,
            monitor_secs: 600,
        }
    }
}

impl SweepConfig {
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_secs.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub environment: Environment,
    pub rate_limit: RateLimitConfig,
    pub csrf: CsrfConfig,
    pub sanitizer: SanitizerConfig,
    pub monitor: MonitorConfig,
    pub body_limits: BodyLimits,
    pub cors: CorsConfig,
    pub sweep: SweepConfig,
}

impl SecurityConfig {
    /// Internal error messages reach clients only in development
    pub fn expose_internal(&self) -> bool {
        self.environment == Environment::Development
    }
}
