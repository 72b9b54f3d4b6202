use std::str::FromStr;
use std::sync::Arc;

use catalog_admin_core::ProductId;
use dashmap::DashMap;
use serde_json::json;

use crate::dto::{CreateProductRequest, Product, ProductResponse, UpdateProductRequest};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{HandlerResponse, RouteHandler, SecuredRequest};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

/// Roles allowed to change the catalog
const WRITER_ROLES: &[&str] = &["admin", "editor"];

/// In-memory stand-in for the catalog backend
#[derive(Clone, Default)]
pub struct ProductStore {
    products: Arc<DashMap<ProductId, Product>>,
}

impl ProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn get(&self, id: &ProductId) -> Option<Product> {
        self.products.get(id).map(|entry| entry.value().clone())
    }

    /// Oldest first, optionally restricted to one category
    pub fn list(&self, category: Option<&str>) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .products
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.category == c))
            .map(|entry| entry.value().clone())
            .collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        products
    }

    pub fn update(&self, id: &ProductId, update: UpdateProductRequest) -> Option<Product> {
        self.products.get_mut(id).map(|mut entry| {
            entry.apply(update);
            entry.value().clone()
        })
    }

    pub fn remove(&self, id: &ProductId) -> Option<Product> {
        self.products.remove(id).map(|(_, product)| product)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

fn product_id(request: &SecuredRequest) -> ApiResult<ProductId> {
    let raw = request
        .path_param("id")
        .ok_or_else(|| ApiError::BadRequest("Missing product id".to_string()))?;
    ProductId::from_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid product id: {}", raw)))
}

fn require_writer(request: &SecuredRequest) -> ApiResult<()> {
    if request.principal()?.has_any_role(WRITER_ROLES) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn parse_usize(request: &SecuredRequest, name: &str, default: usize) -> ApiResult<usize> {
    match request.query_param(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid {}: {}", name, raw))),
        None => Ok(default),
    }
}

pub fn list(store: ProductStore) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let store = store.clone();
        async move {
            let limit = parse_usize(&request, "limit", DEFAULT_PAGE_SIZE)?.clamp(1, MAX_PAGE_SIZE);
            let offset = parse_usize(&request, "offset", 0)?;

            let products = store.list(request.query_param("category"));
            let total = products.len();
            let items: Vec<ProductResponse> = products
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(ProductResponse::from)
                .collect();

            HandlerResponse::ok(&json!({
                "items": items,
                "total": total,
                "limit": limit,
                "offset": offset,
            }))
        }
    }
}

pub fn create(store: ProductStore) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let store = store.clone();
        async move {
            require_writer(&request)?;
            let payload: CreateProductRequest = request.body_as()?;
            let principal = request.principal()?;

            let duplicate = store.list(None).into_iter().any(|p| p.sku == payload.sku);
            if duplicate {
                return Err(ApiError::BadRequest(format!("SKU already exists: {}", payload.sku)));
            }

            let product = Product::create(payload, principal.id);
            store.insert(product.clone());
            tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");

            HandlerResponse::created(&ProductResponse::from(product))
        }
    }
}

pub fn get(store: ProductStore) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let store = store.clone();
        async move {
            let id = product_id(&request)?;
            let product = store
                .get(&id)
                .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;
            HandlerResponse::ok(&ProductResponse::from(product))
        }
    }
}

pub fn update(store: ProductStore) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let store = store.clone();
        async move {
            require_writer(&request)?;
            let id = product_id(&request)?;
            let payload: UpdateProductRequest = request.body_as()?;

            let product = store
                .update(&id, payload)
                .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;
            HandlerResponse::ok(&ProductResponse::from(product))
        }
    }
}

pub fn delete(store: ProductStore) -> impl RouteHandler {
    move |request: SecuredRequest| {
        let store = store.clone();
        async move {
            require_writer(&request)?;
            let id = product_id(&request)?;

            store
                .remove(&id)
                .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;
            tracing::info!(product_id = %id, "Product deleted");

            HandlerResponse::ok(&json!({ "deleted": id }))
        }
    }
}
