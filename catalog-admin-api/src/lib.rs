pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod response;
pub mod security;
pub mod state;

pub use config::SecurityConfig;
pub use error::{ApiError, ApiResult};
pub use middleware::{EndpointOptions, HandlerResponse, RouteHandler, SecureRoute, SecuredRequest};
pub use state::SecurityState;

use axum::Router;

use crate::dto::{CreateProductRequest, UpdateProductRequest};
use crate::handlers::{products, security as security_handlers};
use crate::handlers::products::ProductStore;
use crate::security::TypedSchema;

/// The admin surface: CSRF token issuance, the product catalog and the
/// security monitor queries, every route behind the pipeline.
pub fn routes(state: SecurityState) -> Router {
    routes_with_store(state, ProductStore::new())
}

pub fn routes_with_store(state: SecurityState, store: ProductStore) -> Router {
    let csrf_token = SecureRoute::new("/csrf-token", state.clone()).get(
        security_handlers::csrf_token(state.csrf.clone()),
        EndpointOptions::public(),
    );

    let product_collection = SecureRoute::new("/products", state.clone())
        .get(products::list(store.clone()), EndpointOptions::protected())
        .post(
            products::create(store.clone()),
            EndpointOptions::protected().with_schema(TypedSchema::<CreateProductRequest>::new()),
        );

    let product_item = SecureRoute::new("/products/:id", state.clone())
        .get(products::get(store.clone()), EndpointOptions::protected())
        .put(
            products::update(store.clone()),
            EndpointOptions::protected().with_schema(TypedSchema::<UpdateProductRequest>::new()),
        )
        .delete(products::delete(store), EndpointOptions::protected());

    let monitor = &state.monitor;
    let events = SecureRoute::new("/security/events", state.clone())
        .get(security_handlers::events(monitor.clone()), EndpointOptions::protected());
    let suspicious = SecureRoute::new("/security/suspicious", state.clone())
        .get(security_handlers::suspicious(monitor.clone()), EndpointOptions::protected());
    let metrics = SecureRoute::new("/security/metrics", state.clone())
        .get(security_handlers::metrics(monitor.clone()), EndpointOptions::protected());

    Router::new()
        .route("/csrf-token", csrf_token.into_method_router())
        .route("/products", product_collection.into_method_router())
        .route("/products/:id", product_item.into_method_router())
        .route("/security/events", events.into_method_router())
        .route("/security/suspicious", suspicious.into_method_router())
        .route("/security/metrics", metrics.into_method_router())
}
