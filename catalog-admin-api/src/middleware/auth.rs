use axum::http::{header, HeaderMap};
use catalog_admin_core::Principal;

use crate::error::ApiError;
use crate::security::csrf::extract_cookie;

/// Cookie carrying the session token for browser clients
pub const SESSION_COOKIE: &str = "session";

/// `Authorization: Bearer <token>`, falling back to the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| extract_cookie(headers, SESSION_COOKIE).filter(|t| !t.is_empty()))
}

/// Require an authenticated principal holding `role`
pub fn require_role<'a>(principal: Option<&'a Principal>, role: &str) -> Result<&'a Principal, ApiError> {
    let principal = principal.ok_or(ApiError::Unauthorized)?;
    if principal.has_role(role) {
        Ok(principal)
    } else {
        Err(ApiError::Forbidden)
    }
}
