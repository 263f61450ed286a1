//! Resolves the rate-limit key for a request.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// `CF-Connecting-IP`, else the first `X-Forwarded-For` hop, else the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header(CF_CONNECTING_IP) {
        return ip.to_string();
    }
    if let Some(first) = header(X_FORWARDED_FOR).and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

pub fn from_request<B>(req: &Request<B>) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(req.headers(), peer)
}
