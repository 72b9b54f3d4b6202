mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
    Router,
};
use catalog_admin_api::{
    config::Environment,
    security::{RateLimitConfig, TypedSchema},
    EndpointOptions, HandlerResponse, SecureRoute, SecuredRequest, SecurityConfig, SecurityState,
};
use catalog_admin_core::{SecurityEventType, Severity};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;
use validator::Validate;

use common::{assert_security_headers, body_json, state_with, TestRequest, ADMIN_TOKEN};

// ===== Test Helper Functions =====

fn echo(calls: Arc<AtomicUsize>) -> impl catalog_admin_api::RouteHandler {
    move |request: SecuredRequest| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            HandlerResponse::ok(&json!({
                "body": request.body,
                "principal": request.principal.map(|p| p.email),
                "params": request.path_params,
                "query": request.query,
                "files": request.files.len(),
            }))
        }
    }
}

struct Harness {
    app: Router,
    state: SecurityState,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new(config: SecurityConfig) -> Self {
        Self::with_options(config, EndpointOptions::protected())
    }

    fn with_options(config: SecurityConfig, options: EndpointOptions) -> Self {
        let state = state_with(config);
        let calls = Arc::new(AtomicUsize::new(0));

        let route = SecureRoute::new("/items", state.clone())
            .get(echo(calls.clone()), options.clone())
            .post(echo(calls.clone()), options.clone())
            .delete(echo(calls.clone()), options);

        let app = Router::new().route("/items", route.into_method_router());
        Self { app, state, calls }
    }

    fn csrf_token(&self) -> String {
        self.state.csrf.issue_token()
    }

    fn handler_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn send(&self, request: axum::http::Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct NewItem {
    #[validate(length(min = 1, max = 20))]
    name: String,
    #[validate(range(min = 1))]
    quantity: u32,
}

// ===== Ordered guard scenarios =====

#[tokio::test]
async fn test_delete_without_csrf_header_is_forbidden() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(TestRequest::new(Method::DELETE, "/items").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_security_headers(&response);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("CSRF_TOKEN_INVALID"));
    assert_eq!(harness.handler_calls(), 0);

    let events = harness
        .state
        .monitor
        .recent_events(10, None, Some(SecurityEventType::CsrfViolation));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::High);
}

#[tokio::test]
async fn test_mismatched_csrf_pair_is_forbidden() {
    let harness = Harness::new(SecurityConfig::default());
    let request = TestRequest::new(Method::POST, "/items")
        .bearer(ADMIN_TOKEN)
        .header("x-csrf-token", &harness.csrf_token())
        .header("cookie", &format!("csrf_token={}", harness.csrf_token()))
        .json(&json!({"name": "x"}));

    let response = harness.send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_request_beyond_limit_is_rate_limited() {
    let mut config = SecurityConfig::default();
    config.rate_limit = RateLimitConfig::new(100, Duration::from_secs(3600));
    let harness = Harness::new(config);

    for _ in 0..100 {
        let response = harness
            .send(TestRequest::new(Method::GET, "/items").bearer(ADMIN_TOKEN).empty())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = harness
        .send(TestRequest::new(Method::GET, "/items").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_security_headers(&response);
    let retry_header: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("RATE_LIMIT_EXCEEDED"));
    let retry_after = body["error"]["details"]["retryAfter"].as_u64().unwrap();
    assert!((1..=3600).contains(&retry_after));
    assert_eq!(retry_after, retry_header);
    assert_eq!(harness.handler_calls(), 100);

    let events = harness
        .state
        .monitor
        .recent_events(10, Some(Severity::Medium), Some(SecurityEventType::RateLimitExceeded));
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let mut config = SecurityConfig::default();
    config.rate_limit = RateLimitConfig::new(1, Duration::from_secs(3600));
    let harness = Harness::new(config);

    let first = harness
        .send(TestRequest::new(Method::GET, "/items").client("198.51.100.1").bearer(ADMIN_TOKEN).empty())
        .await;
    let other_client = harness
        .send(TestRequest::new(Method::GET, "/items").client("198.51.100.2").bearer(ADMIN_TOKEN).empty())
        .await;
    let repeat = harness
        .send(TestRequest::new(Method::GET, "/items").client("198.51.100.1").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-ratelimit-limit").unwrap(), "1");
    assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(other_client.status(), StatusCode::OK);
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_injection_is_sanitized_and_request_continues() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .json(&json!({"name": "a' OR '1'='1", "category": "x"})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["body"], json!({"name": "a OR 11", "category": "x"}));
    assert_eq!(harness.handler_calls(), 1);

    let events = harness
        .state
        .monitor
        .recent_events(10, None, Some(SecurityEventType::SqlInjectionAttempt));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::High);
    assert_eq!(events[0].source_identifier, "203.0.113.10");
    assert!(events[0].principal_id.is_some());
}

#[tokio::test]
async fn test_oversized_json_body_is_rejected() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();
    let blob = "a".repeat(1024 * 1024 + 16);

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .json(&json!({ "blob": blob })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("PAYLOAD_TOO_LARGE"));
    assert_eq!(harness.handler_calls(), 0);
}

#[tokio::test]
async fn test_declared_oversized_length_is_rejected_before_reading() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .header("content-type", "application/json")
                .header("content-length", "5000000")
                .body(Body::from("{}")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(harness.handler_calls(), 0);
}

// ===== Method handling =====

#[tokio::test]
async fn test_preflight_short_circuits() {
    let mut config = SecurityConfig::default();
    config.cors.allowed_origins = vec!["https://admin.example.com".to_string()];
    let harness = Harness::new(config);

    let response = harness
        .send(
            TestRequest::new(Method::OPTIONS, "/items")
                .header("origin", "https://admin.example.com")
                .header("access-control-request-method", "DELETE")
                .empty(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_security_headers(&response);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://admin.example.com"
    );
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_MAX_AGE));
    assert_eq!(harness.handler_calls(), 0);
}

#[tokio::test]
async fn test_unregistered_method_is_not_allowed() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(TestRequest::new(Method::PATCH, "/items").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.headers().get(header::ALLOW).unwrap(),
        "GET, HEAD, POST, DELETE, OPTIONS"
    );
    assert_security_headers(&response);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("METHOD_NOT_ALLOWED"));
}

#[tokio::test]
async fn test_head_is_served_by_get_endpoint() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(TestRequest::new(Method::HEAD, "/items").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_security_headers(&response);
    assert_eq!(harness.handler_calls(), 1);
}

// ===== Authentication =====

#[tokio::test]
async fn test_missing_session_is_unauthorized() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness.send(TestRequest::new(Method::GET, "/items").empty()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));

    let events = harness
        .state
        .monitor
        .recent_events(10, None, Some(SecurityEventType::AuthenticationFailure));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Low);
}

#[tokio::test]
async fn test_unknown_session_is_unauthorized() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(TestRequest::new(Method::GET, "/items").bearer("forged").empty())
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.handler_calls(), 0);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(
            TestRequest::new(Method::GET, "/items")
                .header("cookie", &format!("session={}", ADMIN_TOKEN))
                .empty(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["principal"], json!("admin@example.com"));
}

#[tokio::test]
async fn test_optional_auth_still_resolves_principal() {
    let harness = Harness::with_options(SecurityConfig::default(), EndpointOptions::public());

    let anonymous = harness.send(TestRequest::new(Method::GET, "/items").empty()).await;
    let signed_in = harness
        .send(TestRequest::new(Method::GET, "/items").bearer(ADMIN_TOKEN).empty())
        .await;

    assert_eq!(body_json(anonymous).await["data"]["principal"], Value::Null);
    assert_eq!(
        body_json(signed_in).await["data"]["principal"],
        json!("admin@example.com")
    );
}

// ===== Body handling =====

#[tokio::test]
async fn test_schema_violations_return_issues() {
    let options = EndpointOptions::protected().with_schema(TypedSchema::<NewItem>::new());
    let harness = Harness::with_options(SecurityConfig::default(), options);
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .json(&json!({"name": "", "quantity": 0})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    let paths: Vec<&str> = body["error"]["details"]["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["name", "quantity"]);
    assert_eq!(harness.handler_calls(), 0);
}

#[tokio::test]
async fn test_schema_sees_sanitized_body() {
    let options = EndpointOptions::protected().with_schema(TypedSchema::<NewItem>::new());
    let harness = Harness::with_options(SecurityConfig::default(), options);
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .json(&json!({"name": "<iframe>", "quantity": 2})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["body"]["name"], json!("&lt;iframe&gt;"));
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .header("content-type", "application/json")
                .body(Body::from("{\"name\": ")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], json!("INVALID_JSON"));
}

#[tokio::test]
async fn test_unsupported_content_type_is_rejected() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .header("content-type", "text/xml")
                .body(Body::from("<item/>")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["code"],
        json!("INVALID_CONTENT_TYPE")
    );
}

#[tokio::test]
async fn test_urlencoded_form_is_parsed() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("name=Desk+Lamp&color=red")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["data"]["body"],
        json!({"name": "Desk Lamp", "color": "red"})
    );
}

#[tokio::test]
async fn test_multipart_upload_reaches_handler() {
    let harness = Harness::new(SecurityConfig::default());
    let token = harness.csrf_token();
    let payload = concat!(
        "--BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"caption\"\r\n\r\n",
        "Front view\r\n",
        "--BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"image\"; filename=\"front.jpg\"\r\n",
        "Content-Type: image/jpeg\r\n\r\n",
        "JPEGBYTES\r\n",
        "--BOUNDARY--\r\n",
    );

    let response = harness
        .send(
            TestRequest::new(Method::POST, "/items")
                .bearer(ADMIN_TOKEN)
                .csrf(&token)
                .header("content-type", "multipart/form-data; boundary=BOUNDARY")
                .body(Body::from(payload)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["files"], json!(1));
    assert_eq!(body["data"]["body"]["caption"], json!("Front view"));
    assert_eq!(body["data"]["body"]["image"]["filename"], json!("front.jpg"));
    assert_eq!(body["data"]["body"]["image"]["size"], json!(9));
}

#[tokio::test]
async fn test_query_parameters_are_sanitized() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(
            TestRequest::new(Method::GET, "/items?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E")
                .bearer(ADMIN_TOKEN)
                .empty(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let q = body["data"]["query"]["q"].as_str().unwrap();
    assert!(!q.contains("<script"));

    let events = harness
        .state
        .monitor
        .recent_events(10, None, Some(SecurityEventType::XssAttempt));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].details["field"], json!("query.q"));
}

// ===== Finishing stage =====

#[tokio::test]
async fn test_request_id_is_propagated() {
    let harness = Harness::new(SecurityConfig::default());

    let response = harness
        .send(
            TestRequest::new(Method::GET, "/items")
                .bearer(ADMIN_TOKEN)
                .header("x-request-id", "trace-1234")
                .empty(),
        )
        .await;

    assert_eq!(response.headers().get("x-request-id").unwrap(), "trace-1234");
}

#[tokio::test]
async fn test_cors_headers_only_for_allowed_origins() {
    let mut config = SecurityConfig::default();
    config.cors.allowed_origins = vec!["https://admin.example.com".to_string()];
    let harness = Harness::new(config);

    let allowed = harness
        .send(
            TestRequest::new(Method::GET, "/items")
                .bearer(ADMIN_TOKEN)
                .header("origin", "https://admin.example.com")
                .empty(),
        )
        .await;
    let denied = harness
        .send(
            TestRequest::new(Method::GET, "/items")
                .bearer(ADMIN_TOKEN)
                .header("origin", "https://evil.example.com")
                .empty(),
        )
        .await;

    assert_eq!(
        allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://admin.example.com"
    );
    assert_eq!(
        allowed.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
    assert!(!denied.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    assert_security_headers(&denied);
}

fn panicking_app(environment: Environment) -> Router {
    let mut config = SecurityConfig::default();
    config.environment = environment;
    let state = state_with(config);

    let route = SecureRoute::new("/boom", state).get(
        |_request: SecuredRequest| async move {
            if true {
                panic!("inventory service exploded");
            }
            HandlerResponse::ok(&Value::Null)
        },
        EndpointOptions::public(),
    );
    Router::new().route("/boom", route.into_method_router())
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let app = panicking_app(Environment::Production);

    let response = app
        .oneshot(TestRequest::new(Method::GET, "/boom").empty())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_security_headers(&response);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("INTERNAL_ERROR"));
    assert_eq!(body["error"]["message"], json!("An internal error occurred"));
}

#[tokio::test]
async fn test_development_mode_exposes_internal_message() {
    let app = panicking_app(Environment::Development);

    let response = app
        .oneshot(TestRequest::new(Method::GET, "/boom").empty())
        .await
        .unwrap();

    let body = body_json(response).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("inventory service exploded"));
}
