//! Uniform response envelopes for the catalog admin API.
//!
//! Every body the pipeline produces is one of two shapes:
//!
//! ```json
//! {"success": true, "data": {...}, "timestamp": "2026-03-01T12:00:00Z"}
//! {"success": false, "error": {"code": "...", "message": "...", "details": {...}}, "timestamp": "..."}
//! ```
//!
//! # Examples
//!
//! ```rust
//! use catalog_admin_api::response::{ErrorBody, ErrorEnvelope, SuccessEnvelope};
//!
//! let ok = SuccessEnvelope::new(serde_json::json!({"id": 1}));
//! assert!(ok.success);
//!
//! let err = ErrorEnvelope::new(ErrorBody::new("NOT_FOUND", "Product not found"));
//! assert!(!err.success);
//! ```

pub mod envelope;

pub use envelope::{Envelope, ErrorBody, ErrorEnvelope, SuccessEnvelope};
