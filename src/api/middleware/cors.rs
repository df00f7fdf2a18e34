//! CORS middleware configuration
//!
//! The broadcast stream is public: with no configured origins every origin is
//! accepted. Configuring `CORS_ORIGINS` narrows that to an allowlist.

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Create a CORS layer for the given allowlist (empty = any origin)
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allowed_headers = [header::CONTENT_TYPE, header::ACCEPT];
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(allowed_headers);

    if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing any origin");
        base.allow_origin(Any)
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        base.allow_origin(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn allow_origin_header(origins: &[String], origin: &str) -> Option<String> {
        let app = axum::Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(origins));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .header("Origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_empty_origins_allows_any() {
        assert_eq!(
            allow_origin_header(&[], "https://example.com").await,
            Some("*".to_string())
        );
    }

    #[tokio::test]
    async fn test_cors_with_origins_allows_configured() {
        let origins = vec![
            "https://example.com".to_string(),
            "https://app.example.com".to_string(),
        ];

        assert_eq!(
            allow_origin_header(&origins, "https://app.example.com").await,
            Some("https://app.example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_cors_with_origins_blocks_others() {
        let origins = vec!["https://example.com".to_string()];

        assert!(allow_origin_header(&origins, "https://evil.example")
            .await
            .is_none());
    }
}
