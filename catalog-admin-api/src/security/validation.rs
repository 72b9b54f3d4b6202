//! Schema validation for sanitized request bodies
//!
//! [`TypedSchema`] adapts any `serde` + `validator` type to the
//! [`SchemaValidator`] collaborator used by the request pipeline:
//! - the body is deserialized into the type (shape and type errors)
//! - `validator` rules run on the result (field-level errors)
//! - every failure becomes a [`ValidationIssue`] with a dotted path

use std::borrow::Cow;
use std::collections::HashMap;
use std::marker::PhantomData;

use catalog_admin_core::{SchemaOutcome, SchemaValidator, ValidationIssue};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Validates bodies by deserializing into `T` and running its rules.
///
/// On success the outcome carries `T` re-serialized, so defaults declared on
/// the type are filled in for the handler.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SchemaValidator for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate,
{
    fn validate(&self, raw: Value) -> SchemaOutcome {
        let typed: T = match serde_json::from_value(raw) {
            Ok(typed) => typed,
            Err(e) => {
                return SchemaOutcome::Invalid(vec![ValidationIssue::new(
                    "",
                    "invalid_type",
                    e.to_string(),
                )])
            }
        };

        if let Err(errors) = typed.validate() {
            return SchemaOutcome::Invalid(validation_issues(&errors));
        }

        match serde_json::to_value(&typed) {
            Ok(data) => SchemaOutcome::Valid(data),
            Err(e) => SchemaOutcome::Invalid(vec![ValidationIssue::new(
                "",
                "serialization",
                e.to_string(),
            )]),
        }
    }
}

/// Flatten `validator` errors into issues sorted by path
pub fn validation_issues(errors: &ValidationErrors) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    collect_issues(errors, "", &mut issues);
    issues.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.code.cmp(&b.code)));
    issues
}

fn collect_issues(errors: &ValidationErrors, prefix: &str, out: &mut Vec<ValidationIssue>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                out.extend(field_errors.iter().map(|e| {
                    ValidationIssue::new(path.clone(), e.code.to_string(), issue_message(e))
                }));
            }
            ValidationErrorsKind::Struct(nested) => collect_issues(nested, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_issues(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

fn issue_message(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| default_message(&error.code, &error.params))
}

/// Human-readable message for common validation codes
fn default_message(code: &str, params: &HashMap<Cow<'static, str>, Value>) -> String {
    match code {
        "length" => {
            let min = params.get("min").and_then(|v| v.as_u64());
            let max = params.get("max").and_then(|v| v.as_u64());
            match (min, max) {
                (Some(min), Some(max)) => {
                    format!("Length must be between {} and {} characters", min, max)
                }
                (Some(min), None) => format!("Length must be at least {} characters", min),
                (None, Some(max)) => format!("Length must be at most {} characters", max),
                (None, None) => "Invalid length".to_string(),
            }
        }
        "range" => {
            let min = params.get("min").and_then(|v| v.as_f64());
            let max = params.get("max").and_then(|v| v.as_f64());
            match (min, max) {
                (Some(min), Some(max)) => format!("Value must be between {} and {}", min, max),
                (Some(min), None) => format!("Value must be at least {}", min),
                (None, Some(max)) => format!("Value must be at most {}", max),
                (None, None) => "Invalid range".to_string(),
            }
        }
        "email" => "Invalid email address".to_string(),
        "url" => "Invalid URL".to_string(),
        "required" => "This field is required".to_string(),
        "regex" => "Invalid format".to_string(),
        _ => format!("Validation failed: {}", code),
    }
}

/// Stock-keeping unit: uppercase letters, digits and hyphens
pub fn validate_sku(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("sku");
        err.message = Some("Must contain only uppercase letters, digits, and inner hyphens".into());
        Err(err)
    }
}

/// Lowercase alphanumeric words joined by hyphens
pub fn validate_slug(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("slug");
        err.message = Some("Must be lowercase alphanumeric words separated by hyphens".into());
        Err(err)
    }
}
