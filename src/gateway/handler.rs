//! Gateway request handling.
//!
//! # Responsibilities
//! - Resolve the route, fall through to the auxiliary router on a miss
//! - Translate the request, call the RPC handler, translate the reply
//! - Map failures to HTTP statuses with a JSON error body
//!
//! # Design Decisions
//! - NOT_FOUND → 404, INVALID_ARGUMENT → 400, other RPC errors → 500
//! - Transport failures are 503 UNAVAILABLE, never conflated with RPC errors
//! - The body limit is enforced before translation (413)
//! - A routed path with the wrong method is 405 with `Allow`

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::Serialize;
use tower::ServiceExt;

use crate::gateway::routes::{RouteEntry, RouteTable};
use crate::gateway::translate::{BindingSet, FieldSource};
use crate::http::request::request_id;
use crate::observability::metrics;
use crate::rpc::{CallError, Code, RpcError, Upstream};

/// Everything a gateway request needs, shared across connections.
#[derive(Clone)]
pub struct GatewayState {
    pub routes: Arc<RouteTable>,
    pub bindings: BindingSet,
    pub upstream: Arc<dyn Upstream>,
    pub auxiliary: Router,
    pub max_body: usize,
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// A gateway failure and the response it becomes.
#[derive(Debug)]
pub enum GatewayError {
    Rpc(RpcError),
    Unavailable(String),
    BodyTooLarge(usize),
    MethodNotAllowed(Vec<Method>),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Rpc(err) => err.http_status(),
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, message) = match self {
            GatewayError::Rpc(err) => (err.code(), err.message().to_string()),
            GatewayError::Unavailable(reason) => (Code::Unavailable, reason.clone()),
            GatewayError::BodyTooLarge(limit) => (
                Code::ResourceExhausted,
                format!("request body exceeds {} bytes", limit),
            ),
            GatewayError::MethodNotAllowed(_) => {
                (Code::Unimplemented, "method not allowed on this route".to_string())
            }
        };
        ErrorBody {
            code: code.as_i32(),
            message,
        }
    }
}

impl From<CallError> for GatewayError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Rpc(err) => GatewayError::Rpc(err),
            CallError::Transport(err) => GatewayError::Unavailable(format!("upstream unavailable: {}", err)),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let GatewayError::MethodNotAllowed(methods) = &self {
            let allow = methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

/// Fallback handler of the text router.
pub async fn gateway_handler(State(state): State<GatewayState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(matched) = state.routes.resolve(&method, &path) else {
        let allowed = state.routes.allowed_methods(&path);
        if !allowed.is_empty() {
            tracing::debug!(method = %method, path = %path, "Route exists for other methods");
            return GatewayError::MethodNotAllowed(allowed).into_response();
        }
        tracing::debug!(method = %method, path = %path, "No gateway route, trying auxiliary router");
        return match state.auxiliary.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
    };

    let entry = matched.entry;
    let label = entry.label();
    let request_id = request_id(&request);

    tracing::debug!(
        request_id = %request_id,
        route = %label,
        rpc = %entry.rpc,
        "Translating request"
    );

    let response = match translate_and_call(&state, entry, matched.params, request, &request_id).await {
        Ok(json) => (StatusCode::OK, Json(json)).into_response(),
        Err(err) => {
            match &err {
                GatewayError::Unavailable(reason) => {
                    tracing::warn!(request_id = %request_id, route = %label, error = %reason, "Upstream unavailable")
                }
                other => tracing::debug!(
                    request_id = %request_id,
                    route = %label,
                    status = %other.status(),
                    "Gateway request failed"
                ),
            }
            err.into_response()
        }
    };

    metrics::record_gateway_request(&label, response.status().as_u16(), start);
    response
}

async fn translate_and_call(
    state: &GatewayState,
    entry: &RouteEntry,
    params: Vec<(String, String)>,
    request: Request,
    request_id: &str,
) -> Result<serde_json::Value, GatewayError> {
    let binding = state.bindings.get(&entry.rpc).ok_or_else(|| {
        GatewayError::Rpc(RpcError::unimplemented(format!("no mapping for {}", entry.rpc)))
    })?;

    let body = read_body(request.into_body(), state.max_body).await?;
    let fields =
        FieldSource::new(&body, entry.body, params).map_err(|e| GatewayError::Rpc(e.into()))?;
    let payload = binding
        .encode_request(fields)
        .map_err(|e| GatewayError::Rpc(e.into()))?;

    let reply = state
        .upstream
        .call(&entry.rpc, payload, Some(request_id))
        .await?;

    binding
        .decode_response(reply)
        .map_err(|e| GatewayError::Rpc(e.into()))
}

async fn read_body(body: Body, limit: usize) -> Result<bytes::Bytes, GatewayError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(GatewayError::BodyTooLarge(limit)),
        Err(e) => Err(GatewayError::Rpc(RpcError::invalid_argument(format!(
            "failed to read request body: {}",
            e
        )))),
    }
}
