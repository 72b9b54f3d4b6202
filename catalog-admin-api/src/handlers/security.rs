use std::sync::Arc;

use axum::http::{header, HeaderValue};
use serde_json::json;

use crate::dto::EventsQuery;
use crate::error::ApiError;
use crate::middleware::{require_role, HandlerResponse, RouteHandler, SecuredRequest};
use crate::security::{CsrfGuard, SecurityMonitor};

const ADMIN_ROLE: &str = "admin";

/// Issue a CSRF token in both the body and the double-submit cookie
pub fn csrf_token(csrf: Arc<CsrfGuard>) -> impl RouteHandler {
    move |_request: SecuredRequest| {
        let csrf = Arc::clone(&csrf);
        async move {
            let token = csrf.issue_token();
            let cookie = HeaderValue::from_str(&csrf.set_cookie_value(&token))
                .map_err(|e| ApiError::Internal(format!("Invalid cookie header: {}", e)))?;

            Ok::<_, ApiError>(
                HandlerResponse::ok(&json!({ "token": token }))?.with_header(header::SET_COOKIE, cookie),
            )
        }
    }
}

pub fn events(monitor: Arc<SecurityMonitor>) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let monitor = Arc::clone(&monitor);
        async move {
            require_role(request.principal.as_ref(), ADMIN_ROLE)?;
            let query = EventsQuery::from_params(&request.query)?;

            let events = monitor.recent_events(query.limit, query.severity, query.event_type);
            HandlerResponse::ok(&json!({
                "count": events.len(),
                "events": events,
            }))
        }
    }
}

pub fn suspicious(monitor: Arc<SecurityMonitor>) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let monitor = Arc::clone(&monitor);
        async move {
            require_role(request.principal.as_ref(), ADMIN_ROLE)?;

            let actors = monitor.suspicious_identifiers();
            HandlerResponse::ok(&json!({
                "count": actors.len(),
                "actors": actors,
            }))
        }
    }
}

pub fn metrics(monitor: Arc<SecurityMonitor>) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let monitor = Arc::clone(&monitor);
        async move {
            require_role(request.principal.as_ref(), ADMIN_ROLE)?;
            HandlerResponse::ok(&monitor.metrics())
        }
    }
}
