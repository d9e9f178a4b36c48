//! Protocol translation gateway.
//!
//! # Data Flow
//! ```text
//! HTTP/1 request (or non-RPC HTTP/2 request)
//!     → request id, trace span, timeout (tower-http)
//!     → handler.rs (route lookup)
//!         ├─ routes.rs hit → translate.rs (JSON → message)
//!         │                → rpc::client (HTTP/2 hop, shared trust pool)
//!         │                → translate.rs (message → JSON)
//!         └─ miss → auxiliary.rs (fixed endpoints, else 404)
//! ```
//!
//! # Design Decisions
//! - Route table and bindings are built once and checked before serving
//! - The upstream hop is authenticated even in-process

pub mod auxiliary;
pub mod handler;
pub mod routes;
pub mod translate;

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use auxiliary::auxiliary_router;
pub use handler::{gateway_handler, GatewayError, GatewayState};
pub use routes::{RouteError, RouteTable};
pub use translate::{BindingSet, TranslateError};

use crate::http::request::{request_id, UuidRequestId};

/// The text router served on HTTP/1 connections and for non-RPC HTTP/2 requests.
#[allow(deprecated)]
pub fn text_router(state: GatewayState, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(gateway_handler)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id(request),
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}
