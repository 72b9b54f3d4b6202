//! Request pipeline and the helpers its stages use

pub mod auth;
pub mod body;
pub mod client;
pub mod pipeline;

pub use auth::{extract_session_token, require_role, SESSION_COOKIE};
pub use body::{parse_body, ParsedBody, UploadedFile};
pub use client::{client_identifier, UNKNOWN_CLIENT};
pub use pipeline::{EndpointOptions, HandlerResponse, RouteHandler, SecureRoute, SecuredRequest};
