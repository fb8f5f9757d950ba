//! Route handlers and shared helpers.

pub mod create;
pub mod health;
pub mod stats;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use std::net::SocketAddr;
use utoipa::ToSchema;

use crate::error::GateError;

/// Derive the client identity used as the key for all admission state.
///
/// Priority: `cf-connecting-ip` > `x-real-ip` > first `x-forwarded-for` entry
/// > transport peer address > `"unknown"`. The value is spoofable by design;
/// the trust boundary is the fronting proxy.
#[must_use]
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let raw = header_value(headers, "cf-connecting-ip")
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| forwarded_for(headers))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    canonicalize_ip(&raw)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
}

/// Normalize loopback and IPv4-mapped IPv6 spellings.
fn canonicalize_ip(ip: &str) -> String {
    let ip = ip.trim();
    if ip == "::1" {
        return "127.0.0.1".to_string();
    }
    if let Some(mapped) = ip.strip_prefix("::ffff:") {
        return mapped.to_string();
    }
    ip.to_string()
}

/// Machine-readable rejection envelope shared by every error path.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifts_at_ms: Option<u64>,
}

#[must_use]
pub fn error_response(err: &GateError) -> (StatusCode, Json<ErrorBody>) {
    (
        err.status_code(),
        Json(ErrorBody {
            ok: false,
            error: err.to_string(),
            reason: err.reason().to_string(),
            lifts_at_ms: err.lifts_at_ms(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).expect("header name"),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([192, 0, 2, 1], 44_000)))
    }

    #[test]
    fn cf_connecting_ip_wins() {
        let map = headers(&[
            ("cf-connecting-ip", "198.51.100.7"),
            ("x-real-ip", "203.0.113.1"),
            ("x-forwarded-for", "203.0.113.2, 203.0.113.3"),
        ]);
        assert_eq!(client_identity(&map, peer()), "198.51.100.7");
    }

    #[test]
    fn x_real_ip_beats_forwarded_for() {
        let map = headers(&[
            ("x-real-ip", "203.0.113.1"),
            ("x-forwarded-for", "203.0.113.2"),
        ]);
        assert_eq!(client_identity(&map, peer()), "203.0.113.1");
    }

    #[test]
    fn first_forwarded_for_entry_is_used() {
        let map = headers(&[("x-forwarded-for", " 203.0.113.2 , 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_identity(&map, peer()), "203.0.113.2");
    }

    #[test]
    fn peer_address_is_the_fallback() {
        assert_eq!(client_identity(&HeaderMap::new(), peer()), "192.0.2.1");
    }

    #[test]
    fn unknown_without_headers_or_peer() {
        assert_eq!(client_identity(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn loopback_ipv6_normalizes() {
        let map = headers(&[("x-real-ip", "::1")]);
        assert_eq!(client_identity(&map, None), "127.0.0.1");
    }

    #[test]
    fn ipv4_mapped_ipv6_strips_prefix() {
        let map = headers(&[("cf-connecting-ip", "::ffff:203.0.113.9")]);
        assert_eq!(client_identity(&map, None), "203.0.113.9");
    }

    #[test]
    fn empty_header_values_are_skipped() {
        let map = headers(&[("cf-connecting-ip", "  "), ("x-real-ip", "203.0.113.1")]);
        assert_eq!(client_identity(&map, None), "203.0.113.1");
    }
}
