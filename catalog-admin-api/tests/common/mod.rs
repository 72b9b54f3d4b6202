#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response},
};
use catalog_admin_api::{SecurityConfig, SecurityState};
use catalog_admin_core::{Principal, PrincipalId, Result as CoreResult, SessionResolver};
use http_body_util::BodyExt;
use serde_json::Value;

pub const ADMIN_TOKEN: &str = "admin-session";
pub const EDITOR_TOKEN: &str = "editor-session";
pub const VIEWER_TOKEN: &str = "viewer-session";

/// Session store keyed by opaque token
pub struct StaticSessions {
    sessions: HashMap<String, Principal>,
}

impl StaticSessions {
    pub fn standard() -> Self {
        let mut sessions = HashMap::new();
        for (token, role) in [(ADMIN_TOKEN, "admin"), (EDITOR_TOKEN, "editor"), (VIEWER_TOKEN, "viewer")] {
            sessions.insert(
                token.to_string(),
                Principal::new(PrincipalId::new(), format!("{}@example.com", role), vec![role.to_string()]),
            );
        }
        Self { sessions }
    }

    pub fn principal(&self, token: &str) -> Principal {
        self.sessions[token].clone()
    }
}

#[async_trait]
impl SessionResolver for StaticSessions {
    async fn resolve_session(&self, token: &str) -> CoreResult<Option<Principal>> {
        Ok(self.sessions.get(token).cloned())
    }
}

pub fn state_with(config: SecurityConfig) -> SecurityState {
    SecurityState::new(config, Arc::new(StaticSessions::standard()))
}

/// Request builder carrying a client address, and optionally a session
/// and a matching CSRF header/cookie pair
pub struct TestRequest {
    builder: axum::http::request::Builder,
    client: String,
    cookies: Vec<String>,
}

impl TestRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            builder: Request::builder().method(method).uri(uri),
            client: "203.0.113.10".to_string(),
            cookies: Vec::new(),
        }
    }

    pub fn client(mut self, ip: &str) -> Self {
        self.client = ip.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {}", token);
        self.header(header::AUTHORIZATION.as_str(), &value)
    }

    pub fn csrf(mut self, token: &str) -> Self {
        self.builder = self.builder.header("x-csrf-token", token);
        self.cookies.push(format!("csrf_token={}", token));
        self
    }

    pub fn json(self, body: &Value) -> Request<Body> {
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
            .body(Body::from(body.to_string()))
    }

    pub fn body(self, body: Body) -> Request<Body> {
        let mut builder = self.builder.header("x-forwarded-for", self.client);
        if !self.cookies.is_empty() {
            builder = builder.header(header::COOKIE, self.cookies.join("; "));
        }
        builder.body(body).unwrap()
    }

    pub fn empty(self) -> Request<Body> {
        self.body(Body::empty())
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_security_headers<B>(response: &Response<B>) {
    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("strict-transport-security"));
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "no-store, no-cache, must-revalidate, proxy-revalidate"
    );
    assert!(headers.contains_key("x-request-id"));
}
