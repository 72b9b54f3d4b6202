//! Request pipeline wrapping every admin endpoint
//!
//! Stages run in a fixed order and the first failure short-circuits:
//!
//! 1. `OPTIONS` preflight answers 200 immediately
//! 2. method allow-list (405 with `Allow`)
//! 3. rate limit per client and route (429 with `Retry-After`)
//! 4. CSRF double-submit check on unsafe methods (403)
//! 5. session resolution (401 when required)
//! 6. body parsing, sanitization and schema validation (413 / 400)
//! 7. the handler, with panics caught (500)
//!
//! Whatever the outcome, the response then gets CORS headers (allow-listed
//! origins only), the fixed security header set, `X-Request-ID` and rate
//! limit headers, and the request is logged and counted.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Request},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, MethodRouter},
};
use catalog_admin_core::{
    Principal, RequestOrigin, SchemaOutcome, SchemaValidator, SecurityEvent, SecurityEventType,
    Severity,
};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::auth::extract_session_token;
use super::body::{parse_body, UploadedFile};
use super::client::client_identifier;
use crate::error::{ApiError, ApiResult};
use crate::observability::logging::{request_id_from, set_request_id};
use crate::observability::metrics::HttpMetrics;
use crate::response::SuccessEnvelope;
use crate::security::rate_limit::{apply_rate_limit_headers, RateLimitInfo, RateLimitKey};
use crate::state::SecurityState;

/// Per-endpoint guard switches
#[derive(Clone)]
pub struct EndpointOptions {
    pub require_csrf: bool,
    pub require_auth: bool,
    pub schema: Option<Arc<dyn SchemaValidator>>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            require_csrf: true,
            require_auth: true,
            schema: None,
        }
    }
}

impl EndpointOptions {
    /// Authenticated and CSRF-protected (the default)
    pub fn protected() -> Self {
        Self::default()
    }

    /// Neither authentication nor CSRF
    pub fn public() -> Self {
        Self {
            require_csrf: false,
            require_auth: false,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: impl SchemaValidator + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn without_csrf(mut self) -> Self {
        self.require_csrf = false;
        self
    }
}

impl std::fmt::Debug for EndpointOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("require_csrf", &self.require_csrf)
            .field("require_auth", &self.require_auth)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

/// What a handler receives once every guard has passed
#[derive(Debug)]
pub struct SecuredRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Sanitized (and, with a schema, validated) body
    pub body: Option<Value>,
    pub files: Vec<UploadedFile>,
    /// Sanitized path parameters
    pub path_params: HashMap<String, String>,
    /// Sanitized query parameters
    pub query: HashMap<String, String>,
    pub principal: Option<Principal>,
    pub origin: RequestOrigin,
    pub request_id: String,
}

impl SecuredRequest {
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Deserialize the body; a missing body is a bad request
    pub fn body_as<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| ApiError::BadRequest("Request body required".to_string()))?;
        serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))
    }

    pub fn principal(&self) -> ApiResult<&Principal> {
        self.principal.as_ref().ok_or(ApiError::Unauthorized)
    }
}

/// Handler result wrapped in the success envelope
#[derive(Debug)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub data: Value,
    pub headers: HeaderMap,
}

impl HandlerResponse {
    pub fn new(status: StatusCode, data: Value) -> Self {
        Self {
            status,
            data,
            headers: HeaderMap::new(),
        }
    }

    pub fn ok<T: Serialize>(data: &T) -> ApiResult<Self> {
        Ok(Self::new(StatusCode::OK, to_data(data)?))
    }

    pub fn created<T: Serialize>(data: &T) -> ApiResult<Self> {
        Ok(Self::new(StatusCode::CREATED, to_data(data)?))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

fn to_data<T: Serialize>(data: &T) -> ApiResult<Value> {
    serde_json::to_value(data).map_err(|e| ApiError::Internal(format!("Response serialization failed: {}", e)))
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        let mut response = SuccessEnvelope::new(self.data).into_response_with(self.status);
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Business logic invoked at the end of the pipeline
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn call(&self, request: SecuredRequest) -> ApiResult<HandlerResponse>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(SecuredRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<HandlerResponse>> + Send + 'static,
{
    async fn call(&self, request: SecuredRequest) -> ApiResult<HandlerResponse> {
        (self)(request).await
    }
}

#[derive(Clone)]
struct Endpoint {
    options: EndpointOptions,
    handler: Arc<dyn RouteHandler>,
}

/// One path, one endpoint per method, all behind the pipeline.
///
/// ```rust,ignore
/// let route = SecureRoute::new("/products", state.clone())
///     .get(list_products, EndpointOptions::protected())
///     .post(create_product, EndpointOptions::protected().with_schema(TypedSchema::<CreateProductRequest>::new()));
/// let app = Router::new().route("/products", route.into_method_router());
/// ```
pub struct SecureRoute {
    route: String,
    state: SecurityState,
    endpoints: Vec<(Method, Endpoint)>,
}

impl SecureRoute {
    /// `route` labels logs, metrics and the rate-limit scope
    pub fn new(route: impl Into<String>, state: SecurityState) -> Self {
        Self {
            route: route.into(),
            state,
            endpoints: Vec::new(),
        }
    }

    pub fn on(mut self, method: Method, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        let endpoint = Endpoint {
            options,
            handler: Arc::new(handler),
        };
        match self.endpoints.iter_mut().find(|(m, _)| *m == method) {
            Some((_, existing)) => *existing = endpoint,
            None => self.endpoints.push((method, endpoint)),
        }
        self
    }

    pub fn get(self, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        self.on(Method::GET, handler, options)
    }

    pub fn post(self, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        self.on(Method::POST, handler, options)
    }

    pub fn put(self, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        self.on(Method::PUT, handler, options)
    }

    pub fn patch(self, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        self.on(Method::PATCH, handler, options)
    }

    pub fn delete(self, handler: impl RouteHandler, options: EndpointOptions) -> Self {
        self.on(Method::DELETE, handler, options)
    }

    /// Mount on a `Router`. Every method reaches the pipeline so that
    /// unregistered ones still get the 405 envelope and security headers.
    pub fn into_method_router(self) -> MethodRouter {
        let form_limit = self.state.config.body_limits.form_bytes;
        let allow = allow_header(&self.endpoints);
        let pipeline = Arc::new(Pipeline {
            route: self.route,
            state: self.state,
            endpoints: self.endpoints,
            allow,
        });

        any(move |request: Request| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run(request).await }
        })
        .layer(DefaultBodyLimit::max(form_limit))
    }
}

/// `HEAD` falls back to the `GET` endpoint unless registered itself
fn find_endpoint<'a>(endpoints: &'a [(Method, Endpoint)], method: &Method) -> Option<&'a Endpoint> {
    let lookup = |wanted: &Method| endpoints.iter().find(|(m, _)| m == wanted).map(|(_, e)| e);
    match lookup(method) {
        None if *method == Method::HEAD => lookup(&Method::GET),
        found => found,
    }
}

fn allow_header(endpoints: &[(Method, Endpoint)]) -> HeaderValue {
    let mut methods: Vec<&str> = endpoints.iter().map(|(m, _)| m.as_str()).collect();
    if !methods.contains(&Method::HEAD.as_str()) {
        if let Some(pos) = methods.iter().position(|m| *m == Method::GET.as_str()) {
            methods.insert(pos + 1, Method::HEAD.as_str());
        }
    }
    methods.push(Method::OPTIONS.as_str());
    HeaderValue::from_str(&methods.join(", ")).unwrap_or_else(|_| HeaderValue::from_static("OPTIONS"))
}

/// Per-request facts the finishing stage needs whatever the outcome
struct RequestContext {
    request_id: String,
    origin: RequestOrigin,
    rate_limit: Option<RateLimitInfo>,
}

struct Pipeline {
    route: String,
    state: SecurityState,
    endpoints: Vec<(Method, Endpoint)>,
    allow: HeaderValue,
}

impl Pipeline {
    async fn run(&self, request: Request) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();

        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let request_headers = parts.headers.clone();

        let client = client_identifier(&parts);
        let mut origin = RequestOrigin::new(client, method.as_str(), parts.uri.to_string());
        if let Some(agent) = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
        {
            origin = origin.with_user_agent(agent);
        }

        let mut ctx = RequestContext {
            request_id: request_id_from(&parts.headers),
            origin,
            rate_limit: None,
        };

        let mut response = match self.process(parts, body, &mut ctx).await {
            Ok(response) => response,
            Err(err) => self.error_response(err, &ctx),
        };

        let headers = response.headers_mut();
        self.state.cors.apply(&method, &request_headers, headers);
        self.state.headers.apply(headers);
        set_request_id(headers, &ctx.request_id);
        if let Some(info) = &ctx.rate_limit {
            apply_rate_limit_headers(headers, info);
        }

        let status = response.status();
        let elapsed = started.elapsed();
        HttpMetrics::record(method.as_str(), &self.route, status.as_u16(), elapsed);

        let duration_ms = elapsed.as_millis() as u64;
        let client = ctx.origin.source_identifier.as_str();
        let request_id = ctx.request_id.as_str();
        if status.is_server_error() {
            error!(request_id, %method, path = %path, status = status.as_u16(), duration_ms, client, "Request failed");
        } else if status.is_client_error() {
            warn!(request_id, %method, path = %path, status = status.as_u16(), duration_ms, client, "Request rejected");
        } else {
            info!(request_id, %method, path = %path, status = status.as_u16(), duration_ms, client, "Request completed");
        }

        response
    }

    async fn process(&self, mut parts: Parts, body: Body, ctx: &mut RequestContext) -> ApiResult<Response> {
        let method = parts.method.clone();

        if method == Method::OPTIONS {
            return Ok(StatusCode::OK.into_response());
        }

        let endpoint = find_endpoint(&self.endpoints, &method)
            .cloned()
            .ok_or(ApiError::MethodNotAllowed)?;

        self.check_rate_limit(ctx)?;

        if endpoint.options.require_csrf {
            if let Err(reason) = self.state.csrf.verify_headers(&method, &parts.headers) {
                warn!(request_id = %ctx.request_id, reason = %reason, "CSRF check failed");
                self.record(
                    SecurityEvent::new(SecurityEventType::CsrfViolation, Severity::High, &ctx.origin)
                        .with_detail("reason", reason.to_string()),
                );
                return Err(ApiError::CsrfInvalid);
            }
        }

        let principal = self.authenticate(&parts.headers, endpoint.options.require_auth, ctx).await?;

        let sanitizer = &self.state.sanitizer;
        let path_params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
            .await
            .map(|Path(params)| params)
            .unwrap_or_default();
        let path_params = sanitizer.sanitize_map(path_params, "params", Some(&ctx.origin));

        let query: HashMap<String, String> = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let query = sanitizer.sanitize_map(query, "query", Some(&ctx.origin));

        let uri = parts.uri.clone();
        let headers = parts.headers.clone();

        let (body, files) = if is_state_changing(&method) {
            let parsed = parse_body(parts, body, &self.state.config.body_limits).await?;
            let value = parsed.value.map(|v| sanitizer.sanitize(v, Some(&ctx.origin)));
            let files = parsed
                .files
                .into_iter()
                .map(|mut file| {
                    file.filename = sanitizer.sanitize_str(&file.filename, Some(&ctx.origin));
                    file
                })
                .collect();

            let value = match &endpoint.options.schema {
                Some(schema) => match schema.validate(value.unwrap_or(Value::Null)) {
                    SchemaOutcome::Valid(data) => Some(data),
                    SchemaOutcome::Invalid(issues) => return Err(ApiError::Validation(issues)),
                },
                None => value,
            };
            (value, files)
        } else {
            (None, Vec::new())
        };

        let secured = SecuredRequest {
            method,
            uri,
            headers,
            body,
            files,
            path_params,
            query,
            principal,
            origin: ctx.origin.clone(),
            request_id: ctx.request_id.clone(),
        };

        match AssertUnwindSafe(endpoint.handler.call(secured)).catch_unwind().await {
            Ok(result) => result.map(IntoResponse::into_response),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ApiError::Internal(format!("Handler panicked: {}", message)))
            }
        }
    }

    fn check_rate_limit(&self, ctx: &mut RequestContext) -> ApiResult<()> {
        let key = RateLimitKey::Scoped {
            client: ctx.origin.source_identifier.clone(),
            scope: self.route.clone(),
        };

        match self.state.limiter.check(&key, &self.state.config.rate_limit) {
            Ok(info) => {
                ctx.rate_limit = Some(info);
                Ok(())
            }
            Err(err) => {
                self.record(
                    SecurityEvent::new(SecurityEventType::RateLimitExceeded, Severity::Medium, &ctx.origin)
                        .with_detail("limit", err.limit())
                        .with_detail("route", self.route.clone()),
                );
                Err(err.into())
            }
        }
    }

    async fn authenticate(
        &self,
        headers: &HeaderMap,
        required: bool,
        ctx: &mut RequestContext,
    ) -> ApiResult<Option<Principal>> {
        let resolved = match extract_session_token(headers) {
            Some(token) => match self.state.sessions.resolve_session(&token).await {
                Ok(principal) => principal,
                Err(err) if required => return Err(err.into()),
                Err(err) => {
                    warn!(request_id = %ctx.request_id, error = %err, "Optional session lookup failed");
                    None
                }
            },
            None => None,
        };

        match resolved {
            Some(principal) => {
                ctx.origin = ctx.origin.clone().with_principal(principal.id);
                Ok(Some(principal))
            }
            None if required => {
                let reason = if extract_session_token(headers).is_some() {
                    "invalid_session"
                } else {
                    "missing_session"
                };
                self.record(
                    SecurityEvent::new(SecurityEventType::AuthenticationFailure, Severity::Low, &ctx.origin)
                        .with_detail("reason", reason),
                );
                Err(ApiError::Unauthorized)
            }
            None => Ok(None),
        }
    }

    fn record(&self, event: SecurityEvent) {
        self.state.monitor.record(event);
    }

    fn error_response(&self, err: ApiError, ctx: &RequestContext) -> Response {
        HttpMetrics::rejection(err.code());
        if err.is_server_error() {
            error!(request_id = %ctx.request_id, error = %err, code = err.code(), "Pipeline error");
        }

        let method_not_allowed = matches!(err, ApiError::MethodNotAllowed);
        let mut response = err.into_response_with(self.state.config.expose_internal());
        if method_not_allowed {
            response.headers_mut().insert(header::ALLOW, self.allow.clone());
        }
        response
    }
}

fn is_state_changing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}
