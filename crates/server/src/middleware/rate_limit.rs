//! Rate limiting middleware using governor and `tower_governor`.
//!
//! Only the token presentation endpoints are limited: invite and admin
//! tokens are bearer credentials embedded in URLs, so those routes are the
//! one place an attacker could grind at the HMAC.

use std::sync::Arc;

use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};

/// Rate limiter layer type for Axum.
///
/// Uses `SmartIpKeyExtractor`, which reads standard proxy headers and falls
/// back to the peer address. The server must therefore be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub type RateLimiterLayer =
    GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Create rate limiter for token presentation: sustained ~2/s per IP.
///
/// Configuration: replenish 2 tokens per second, burst of 10. Legitimate use
/// is a handful of clicks on shared links; this only has to make brute force
/// impractical.
///
/// # Panics
///
/// This function will not panic. The configuration uses only valid positive
/// integers (`per_millisecond(500)` and `burst_size(10)`), which are always
/// accepted by `GovernorConfigBuilder`.
#[must_use]
pub fn token_rate_limiter() -> RateLimiterLayer {
    let config = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_millisecond(500) // Replenish 1 token every 500ms (~2/second)
        .burst_size(10) // Allow burst of 10 requests
        .finish()
        .expect("rate limiter config with per_millisecond(500) and burst_size(10) is valid");
    GovernorLayer::new(Arc::new(config))
}
