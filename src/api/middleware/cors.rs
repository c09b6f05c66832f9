//! CORS middleware configuration
//!
//! Playback clients are arbitrary web players, so the default is any origin
//! without credentials. An explicit whitelist narrows it.

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

const ALLOWED_METHODS: [Method; 3] = [Method::GET, Method::HEAD, Method::OPTIONS];

/// Create a CORS layer with the specified allowed origins
///
/// Every `OPTIONS` request is answered by the layer itself with an empty
/// success, so preflights never reach the handlers.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let exposed = [
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
        header::CONTENT_TYPE,
    ];

    let layer = CorsLayer::new()
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(Any)
        .expose_headers(exposed);

    if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing any origin");
        layer.allow_origin(Any)
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
