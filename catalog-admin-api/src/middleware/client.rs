//! Client identification for rate limiting and event attribution

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{request::Parts, HeaderMap},
};

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Peer address from the connection, then the first `X-Forwarded-For`
/// entry, then `X-Real-IP`, else [`UNKNOWN_CLIENT`].
pub fn client_identifier(parts: &Parts) -> String {
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    forwarded_client(&parts.headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded.or_else(real_ip).map(str::to_string)
}
