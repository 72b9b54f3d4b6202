use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::ids::PrincipalId;

/// Classification of security events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    SqlInjectionAttempt,
    XssAttempt,
    PathTraversalAttempt,
    CommandInjectionAttempt,
    LdapInjectionAttempt,
    /// Input exceeded the maximum accepted string length
    OversizedInput,
    RateLimitExceeded,
    CsrfViolation,
    AuthenticationFailure,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 9] = [
        SecurityEventType::SqlInjectionAttempt,
        SecurityEventType::XssAttempt,
        SecurityEventType::PathTraversalAttempt,
        SecurityEventType::CommandInjectionAttempt,
        SecurityEventType::LdapInjectionAttempt,
        SecurityEventType::OversizedInput,
        SecurityEventType::RateLimitExceeded,
        SecurityEventType::CsrfViolation,
        SecurityEventType::AuthenticationFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::SqlInjectionAttempt => "sql_injection_attempt",
            SecurityEventType::XssAttempt => "xss_attempt",
            SecurityEventType::PathTraversalAttempt => "path_traversal_attempt",
            SecurityEventType::CommandInjectionAttempt => "command_injection_attempt",
            SecurityEventType::LdapInjectionAttempt => "ldap_injection_attempt",
            SecurityEventType::OversizedInput => "oversized_input",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::CsrfViolation => "csrf_violation",
            SecurityEventType::AuthenticationFailure => "authentication_failure",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown security event type: {}", s))
    }
}

/// Severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical events are forwarded to the alert dispatcher
    pub fn is_alerting(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Where a request came from. Attached to every event raised while the
/// request is processed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOrigin {
    pub source_identifier: String,
    pub user_agent: Option<String>,
    pub url: String,
    pub method: String,
    pub principal_id: Option<PrincipalId>,
}

impl RequestOrigin {
    pub fn new(
        source_identifier: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            user_agent: None,
            url: url.into(),
            method: method.into(),
            principal_id: None,
        }
    }

    /// Origin used when the sanitizer runs outside a request
    pub fn unknown() -> Self {
        Self::new("unknown", "", "")
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_principal(mut self, principal_id: PrincipalId) -> Self {
        self.principal_id = Some(principal_id);
        self
    }
}

/// Immutable record of a security-relevant occurrence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub timestamp: DateTime<Utc>,
    pub source_identifier: String,
    pub user_agent: Option<String>,
    pub url: String,
    pub method: String,
    pub details: Map<String, Value>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<PrincipalId>,
}

impl SecurityEvent {
    /// Create an event stamped with the current time
    pub fn new(event_type: SecurityEventType, severity: Severity, origin: &RequestOrigin) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            source_identifier: origin.source_identifier.clone(),
            user_agent: origin.user_agent.clone(),
            url: origin.url.clone(),
            method: origin.method.clone(),
            details: Map::new(),
            severity,
            principal_id: origin.principal_id,
        }
    }

    /// Add a single detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
