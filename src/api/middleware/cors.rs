//! CORS middleware configuration

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Create a CORS layer with the specified allowed origins
///
/// An empty list allows any origin, which is what local development wants.
/// Credentials are only allowed with an explicit origin list.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST];

    if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing any origin");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .allow_credentials(true)
    }
}
