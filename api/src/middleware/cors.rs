use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

use crate::extract::USER_HEADER;

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Build a CORS layer from the `TUTOR_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: local dev servers)
/// - Methods: GET, POST, PUT, DELETE, OPTIONS
/// - Headers: Content-Type, x-user-id
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let origins_str =
        std::env::var("TUTOR_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_ORIGINS.to_string());
    layer_for(&origins_str)
}

fn parse_origins(origins: &str) -> Vec<HeaderValue> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

fn layer_for(origins: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(parse_origins(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(USER_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_entries_are_skipped() {
        let origins = parse_origins(" http://localhost:5173 ,, https://tutor.example ");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "http://localhost:5173");
        assert_eq!(origins[1], "https://tutor.example");
    }
}
