//! CORS (Cross-Origin Resource Sharing) Configuration
//!
//! Strict CORS policy for the HTTP API: only localhost origins are allowed.
//! The checkout frontend is served from the same deployment in production
//! and proxied in development, so nothing else needs cross-origin access.
//!
//! # Security Policy
//!
//! - **Allowed Origins**: Only `localhost` and `127.0.0.1` on any port
//! - **Allowed Methods**: GET, POST, OPTIONS (preflight)
//! - **Allowed Headers**: Content-Type, Authorization, X-Buyer-Id
//! - **Max Age**: 3600 seconds (1 hour) for preflight caching

use http::{header::HeaderValue, HeaderName, Method};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Buyer-identity header set by the auth collaborator
pub const BUYER_ID_HEADER: HeaderName = HeaderName::from_static("x-buyer-id");

/// Standard allowed headers for the API
pub const ALLOWED_HEADERS: [HeaderName; 3] = [
    http::header::CONTENT_TYPE,
    http::header::AUTHORIZATION,
    BUYER_ID_HEADER,
];

/// Standard allowed methods for the API
pub const ALLOWED_METHODS: [Method; 3] = [Method::GET, Method::POST, Method::OPTIONS];

/// Default max age for preflight cache (1 hour)
pub const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// Creates a strict CORS layer that only allows localhost origins.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| {
            is_localhost_origin(origin)
        }))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
        .max_age(Duration::from_secs(DEFAULT_MAX_AGE_SECS))
}

/// Whether an Origin header value points at localhost
fn is_localhost_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let host = rest.split(':').next().unwrap_or("");
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}
