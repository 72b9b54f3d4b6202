use catalog_admin_core::{PrincipalId, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::security::validation::{validate_sku, validate_slug};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(custom(function = "validate_slug"))]
    pub category: String,
    #[validate(length(min = 3, max = 64), custom(function = "validate_sku"))]
    pub sku: String,
    #[validate(range(min = 0, max = 100_000_000))]
    pub price_cents: i64,
    #[serde(default)]
    pub stock: u32,
    #[validate(length(max = 20))]
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[validate(custom(function = "validate_slug"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[validate(range(min = 0, max = 100_000_000))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,
    #[validate(length(max = 20))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// In-memory catalog record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub sku: String,
    pub price_cents: i64,
    pub stock: u32,
    pub tags: Vec<String>,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(request: CreateProductRequest, created_by: PrincipalId) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId::new(),
            name: request.name,
            description: request.description,
            category: request.category,
            sku: request.sku,
            price_cents: request.price_cents,
            stock: request.stock,
            tags: request.tags,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: UpdateProductRequest) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(price_cents) = update.price_cents {
            self.price_cents = price_cents;
        }
        if let Some(stock) = update.stock {
            self.stock = stock;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub sku: String,
    pub price_cents: i64,
    pub stock: u32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            description: product.description,
            category: product.category,
            sku: product.sku,
            price_cents: product.price_cents,
            stock: product.stock,
            tags: product.tags,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_admin_core::{SchemaOutcome, SchemaValidator};
    use serde_json::json;

    use crate::security::validation::TypedSchema;

    #[test]
    fn test_create_request_validates() {
        let schema = TypedSchema::<CreateProductRequest>::new();
        let outcome = schema.validate(json!({
            "name": "Desk Lamp",
            "category": "home-office",
            "sku": "LAMP-001",
            "priceCents": 4999
        }));

        let SchemaOutcome::Valid(data) = outcome else {
            panic!("expected valid outcome");
        };
        assert_eq!(data["stock"], json!(0));
        assert_eq!(data["tags"], json!([]));
    }

    #[test]
    fn test_create_request_rejects_bad_fields() {
        let schema = TypedSchema::<CreateProductRequest>::new();
        let SchemaOutcome::Invalid(issues) = schema.validate(json!({
            "name": "",
            "category": "Home Office",
            "sku": "lamp",
            "priceCents": -1
        })) else {
            panic!("expected invalid outcome");
        };

        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["category", "name", "price_cents", "sku"]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let schema = TypedSchema::<UpdateProductRequest>::new();
        assert!(matches!(
            schema.validate(json!({"is_admin": true})),
            SchemaOutcome::Invalid(_)
        ));
    }

    #[test]
    fn test_apply_update() {
        let mut product = Product::create(
            CreateProductRequest {
                name: "Lamp".into(),
                description: None,
                category: "lighting".into(),
                sku: "LAMP-1".into(),
                price_cents: 100,
                stock: 1,
                tags: vec![],
            },
            PrincipalId::new(),
        );

        product.apply(UpdateProductRequest {
            price_cents: Some(250),
            ..Default::default()
        });

        assert_eq!(product.price_cents, 250);
        assert_eq!(product.name, "Lamp");
        assert!(product.updated_at >= product.created_at);
    }
}
