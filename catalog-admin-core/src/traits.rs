use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Principal, SchemaOutcome, SecurityEvent};
use crate::error::Result;

/// Resolves a session token into the principal it belongs to.
///
/// `Ok(None)` means the token is unknown or no longer valid; `Err` is
/// reserved for the resolver itself failing (store unreachable, etc.).
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_session(&self, token: &str) -> Result<Option<Principal>>;
}

/// Validates an already-sanitized request body.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, raw: Value) -> SchemaOutcome;
}

/// Destination for security events emitted by guards and the sanitizer.
///
/// Recording must never fail the caller: implementations swallow their own
/// errors.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Receives high and critical severity events for out-of-band alerting.
pub trait AlertDispatcher: Send + Sync {
    fn dispatch(&self, event: &SecurityEvent);
}
