//! Fixed diagnostic endpoints reachable without RPC translation.

use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;

pub const TEST_ENDPOINT_BODY: &str = "this is a test endpoint";

/// `/foobar/` and everything below it; 404 elsewhere.
pub fn auxiliary_router() -> Router {
    Router::new()
        .route("/foobar", get(|| async { Redirect::permanent("/foobar/") }))
        .route("/foobar/", get(test_endpoint))
        .route("/foobar/{*rest}", get(test_endpoint))
        .fallback(not_found)
}

async fn test_endpoint() -> &'static str {
    TEST_ENDPOINT_BODY
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}
