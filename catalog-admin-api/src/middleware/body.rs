//! Request body parsing by content type with size caps
//!
//! JSON bodies are capped at [`BodyLimits::json_bytes`]; url-encoded and
//! multipart forms at [`BodyLimits::form_bytes`]. A declared
//! `Content-Length` over the cap is rejected before any byte is read.

use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, FromRequest, Multipart, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use http_body_util::LengthLimitError;
use serde_json::{json, Map, Value};

use crate::config::BodyLimits;
use crate::error::ApiError;

/// A file part of a multipart body
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct ParsedBody {
    /// `None` when the request carried no body
    pub value: Option<Value>,
    pub files: Vec<UploadedFile>,
}

impl ParsedBody {
    fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Json,
    UrlEncoded,
    Multipart,
    Other(String),
    Unspecified,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(raw) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return BodyKind::Unspecified;
    };

    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/json" => BodyKind::Json,
        e if e.starts_with("application/") && e.ends_with("+json") => BodyKind::Json,
        "application/x-www-form-urlencoded" => BodyKind::UrlEncoded,
        "multipart/form-data" => BodyKind::Multipart,
        "" => BodyKind::Unspecified,
        _ => BodyKind::Other(essence),
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Parse the body according to its `Content-Type`.
///
/// Consumes the request parts because multipart extraction needs the whole
/// request back.
pub async fn parse_body(parts: Parts, body: Body, limits: &BodyLimits) -> Result<ParsedBody, ApiError> {
    let declared = declared_length(&parts.headers);
    if declared == Some(0) {
        return Ok(ParsedBody::default());
    }

    match body_kind(&parts.headers) {
        BodyKind::Json => {
            let bytes = read_capped(body, limits.json_bytes, declared).await?;
            if bytes.is_empty() {
                return Ok(ParsedBody::default());
            }
            serde_json::from_slice(&bytes)
                .map(ParsedBody::value)
                .map_err(|e| ApiError::InvalidJson(e.to_string()))
        }
        BodyKind::UrlEncoded => {
            let bytes = read_capped(body, limits.form_bytes, declared).await?;
            Ok(ParsedBody::value(parse_urlencoded(&bytes)))
        }
        BodyKind::Multipart => {
            if declared.is_some_and(|len| len > limits.form_bytes as u64) {
                return Err(ApiError::PayloadTooLarge {
                    limit: limits.form_bytes,
                });
            }
            parse_multipart(Request::from_parts(parts, body), limits.form_bytes).await
        }
        BodyKind::Other(content_type) => {
            let bytes = read_capped(body, limits.json_bytes, declared).await?;
            if bytes.is_empty() {
                Ok(ParsedBody::default())
            } else {
                Err(ApiError::InvalidContentType(content_type))
            }
        }
        BodyKind::Unspecified => {
            let bytes = read_capped(body, limits.json_bytes, declared).await?;
            if bytes.is_empty() {
                Ok(ParsedBody::default())
            } else {
                Err(ApiError::InvalidContentType("missing".to_string()))
            }
        }
    }
}

async fn read_capped(body: Body, limit: usize, declared: Option<u64>) -> Result<Bytes, ApiError> {
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.is::<LengthLimitError>() {
            ApiError::PayloadTooLarge { limit }
        } else {
            ApiError::BadRequest(format!("Failed to read request body: {}", inner))
        }
    })
}

fn parse_urlencoded(bytes: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        insert_field(&mut fields, key.into_owned(), Value::String(value.into_owned()));
    }
    Value::Object(fields)
}

async fn parse_multipart(request: Request, limit: usize) -> Result<ParsedBody, ApiError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut fields = Map::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;

                insert_field(
                    &mut fields,
                    name.clone(),
                    json!({
                        "filename": filename,
                        "contentType": content_type,
                        "size": data.len(),
                    }),
                );
                files.push(UploadedFile {
                    field: name,
                    filename,
                    content_type,
                    data,
                });
            }
            None => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                insert_field(&mut fields, name, Value::String(text));
            }
        }
    }

    Ok(ParsedBody {
        value: Some(Value::Object(fields)),
        files,
    })
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Repeated keys collect into an array in arrival order
fn insert_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(content_type: Option<&str>, body: impl Into<Body>) -> (Parts, Body) {
        let mut builder = axum::http::Request::builder().method("POST").uri("/products");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        builder.body(body.into()).unwrap().into_parts()
    }

    fn limits(json_bytes: usize) -> BodyLimits {
        BodyLimits {
            json_bytes,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_json_body() {
        let (parts, body) = request(Some("application/json; charset=utf-8"), r#"{"name":"Lamp"}"#);
        let parsed = parse_body(parts, body, &BodyLimits::default()).await.unwrap();

        assert_eq!(parsed.value, Some(json!({"name": "Lamp"})));
        assert!(parsed.files.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (parts, body) = request(Some("application/json"), "{not json");
        let err = parse_body(parts, body, &BodyLimits::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_declared_length_over_cap_rejected() {
        let (mut parts, body) = request(Some("application/json"), "{}");
        parts
            .headers
            .insert(header::CONTENT_LENGTH, "2000000".parse().unwrap());

        let err = parse_body(parts, body, &BodyLimits::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { limit: 1_048_576 }));
    }

    #[tokio::test]
    async fn test_streamed_body_over_cap_rejected() {
        let payload = format!(r#"{{"blob":"{}"}}"#, "x".repeat(64));
        let (parts, body) = request(Some("application/json"), payload);

        let err = parse_body(parts, body, &limits(32)).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { limit: 32 }));
    }

    #[tokio::test]
    async fn test_urlencoded_repeated_keys() {
        let (parts, body) = request(
            Some("application/x-www-form-urlencoded"),
            "name=Desk+Lamp&tag=a&tag=b",
        );
        let parsed = parse_body(parts, body, &BodyLimits::default()).await.unwrap();

        assert_eq!(parsed.value, Some(json!({"name": "Desk Lamp", "tag": ["a", "b"]})));
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let payload = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"name\"\r\n\r\n",
            "Lamp\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"image\"; filename=\"lamp.png\"\r\n",
            "Content-Type: image/png\r\n\r\n",
            "PNGDATA\r\n",
            "--XBOUNDARY--\r\n",
        );
        let (parts, body) = request(Some("multipart/form-data; boundary=XBOUNDARY"), payload);
        let parsed = parse_body(parts, body, &BodyLimits::default()).await.unwrap();

        assert_eq!(
            parsed.value,
            Some(json!({
                "name": "Lamp",
                "image": {"filename": "lamp.png", "contentType": "image/png", "size": 7}
            }))
        );
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].field, "image");
        assert_eq!(parsed.files[0].data, Bytes::from_static(b"PNGDATA"));
    }

    #[tokio::test]
    async fn test_multipart_without_boundary_is_bad_request() {
        let (parts, body) = request(Some("multipart/form-data"), "garbage");
        let err = parse_body(parts, body, &BodyLimits::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let (parts, body) = request(Some("text/plain"), "hello");
        let err = parse_body(parts, body, &BodyLimits::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidContentType(ct) if ct == "text/plain"));
    }

    #[tokio::test]
    async fn test_empty_body_without_content_type() {
        let (parts, body) = request(None, Body::empty());
        let parsed = parse_body(parts, body, &BodyLimits::default()).await.unwrap();
        assert!(parsed.value.is_none());
    }

    #[test]
    fn test_body_kind() {
        let mut headers = HeaderMap::new();
        assert_eq!(body_kind(&headers), BodyKind::Unspecified);

        headers.insert(header::CONTENT_TYPE, "application/merge-patch+json".parse().unwrap());
        assert_eq!(body_kind(&headers), BodyKind::Json);

        headers.insert(header::CONTENT_TYPE, "Multipart/Form-Data; boundary=x".parse().unwrap());
        assert_eq!(body_kind(&headers), BodyKind::Multipart);
    }
}
