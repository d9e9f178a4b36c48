//! RPC connection handler.
//!
//! # Responsibilities
//! - Serve HTTP/2 on a classified connection
//! - Unframe requests, dispatch through the method table, frame responses
//! - Report call status in trailers
//! - Hand non-RPC requests on the same connection to the text router
//!
//! # Design Decisions
//! - One handler owns the connection; content-type picks the request path
//! - Method futures live inside the stream's service future, so a reset
//!   stream or closed connection cancels them
//! - Drain sends GOAWAY and lets open streams finish

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tower::ServiceExt;

use crate::http::request::X_REQUEST_ID;
use crate::net::connection::drive_until_drained;
use crate::observability::metrics;
use crate::rpc::codec::{abbreviate, decode_unary, encode_frame, HEADER_LEN};
use crate::rpc::registry::MethodTable;
use crate::rpc::status::{status_trailers, Code, RpcError};

pub const RPC_CONTENT_TYPE: &str = "application/grpc";

/// Metric label for calls to unregistered paths.
const UNKNOWN_METHOD: &str = "unknown";

/// Whether a request on an HTTP/2 connection is an RPC call.
pub fn is_rpc_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with(RPC_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Serves RPC calls, with a text router for everything else.
#[derive(Clone)]
pub struct RpcService {
    table: Arc<MethodTable>,
    fallback: Router,
    max_message: usize,
}

impl RpcService {
    pub fn new(table: Arc<MethodTable>, fallback: Router, max_message: usize) -> Self {
        Self {
            table,
            fallback,
            max_message,
        }
    }

    pub fn table(&self) -> &Arc<MethodTable> {
        &self.table
    }

    /// Serve one connection until the peer closes it or drain completes.
    pub async fn serve_connection<S>(
        &self,
        stream: S,
        drain: watch::Receiver<bool>,
    ) -> Result<(), hyper::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let svc = self.clone();
        let service = service_fn(move |request: Request<Incoming>| {
            let svc = svc.clone();
            async move { Ok::<_, Infallible>(svc.handle(request).await) }
        });

        let conn = http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);
        drive_until_drained(conn.as_mut(), drain, |c| c.graceful_shutdown()).await
    }

    /// Route one request to the RPC path or the text router.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Body>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<axum::BoxError>,
    {
        if is_rpc_request(request.headers()) {
            return self.handle_rpc(request).await;
        }

        match self.fallback.clone().oneshot(request.map(Body::new)).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    async fn handle_rpc<B>(&self, request: Request<B>) -> Response<Body>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<axum::BoxError>,
    {
        let start = Instant::now();
        let path = request.uri().path().to_string();
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let outcome = self.dispatch(&path, &request_id, request).await;
        let code = match &outcome {
            Ok(_) => Code::Ok,
            Err(err) => err.code(),
        };
        metrics::record_rpc(self.metric_label(&path), code.as_str(), start);

        match &outcome {
            Ok(_) => tracing::debug!(method = %path, request_id = %request_id, "RPC completed"),
            Err(err) => tracing::info!(
                method = %path,
                request_id = %request_id,
                code = %err.code(),
                error = %err.message(),
                "RPC failed"
            ),
        }

        rpc_response(outcome)
    }

    /// Registered paths label themselves; anything else shares one label.
    fn metric_label<'a>(&self, path: &'a str) -> &'a str {
        if self.table.get(path).is_some() {
            path
        } else {
            UNKNOWN_METHOD
        }
    }

    async fn dispatch<B>(
        &self,
        path: &str,
        request_id: &str,
        request: Request<B>,
    ) -> Result<Bytes, RpcError>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<axum::BoxError>,
    {
        if request.method() != Method::POST {
            return Err(RpcError::unimplemented(format!(
                "RPC calls must use POST, got {}",
                request.method()
            )));
        }
        let method = self
            .table
            .get(path)
            .ok_or_else(|| RpcError::unimplemented(format!("unknown method {}", path)))?;

        let limit = self.max_message + HEADER_LEN;
        let body = Limited::new(request.into_body(), limit)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    RpcError::new(
                        Code::ResourceExhausted,
                        format!("request exceeds {} bytes", self.max_message),
                    )
                } else {
                    RpcError::new(Code::Cancelled, format!("request body failed: {}", e))
                }
            })?
            .to_bytes();
        let payload = decode_unary(&body, self.max_message)?;

        tracing::info!(
            method = %path,
            request_id = %request_id,
            payload = %abbreviate(&payload),
            "RPC invoked"
        );

        method.invoke(payload).await
    }
}

/// Build the HTTP/2 response for a finished call.
fn rpc_response(outcome: Result<Bytes, RpcError>) -> Response<Body> {
    let (data, status) = match outcome {
        Ok(message) => (Some(encode_frame(&message)), Ok(())),
        Err(err) => (None, Err(err)),
    };

    let mut frames: Vec<Result<Frame<Bytes>, Infallible>> = Vec::with_capacity(2);
    if let Some(data) = data {
        frames.push(Ok(Frame::data(data)));
    }
    frames.push(Ok(Frame::trailers(status_trailers(&status))));

    let mut response = Response::new(Body::new(StreamBody::new(futures_util::stream::iter(
        frames,
    ))));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(RPC_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::echo::{self, EchoMessage};
    use crate::rpc::status::GRPC_STATUS;
    use axum::routing::get;
    use http_body_util::Full;
    use prost::Message;

    fn service() -> RpcService {
        let table = echo::register(MethodTable::builder())
            .with_reflection(true)
            .build()
            .unwrap();
        let fallback = Router::new().route("/plain", get(|| async { "plain text" }));
        RpcService::new(Arc::new(table), fallback, 1024)
    }

    fn rpc_request(path: &str, body: Bytes) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/grpc+proto")
            .body(Full::new(body))
            .unwrap()
    }

    async fn split(response: Response<Body>) -> (Bytes, HeaderMap) {
        let collected = response.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned().unwrap_or_default();
        (collected.to_bytes(), trailers)
    }

    #[tokio::test]
    async fn echo_call_round_trip() {
        let message = EchoMessage {
            value: "ping".into(),
        };
        let request = rpc_request(
            "/echo.EchoService/Echo",
            encode_frame(&message.encode_to_vec()),
        );

        let response = service().handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], RPC_CONTENT_TYPE);

        let (body, trailers) = split(response).await;
        assert_eq!(trailers[GRPC_STATUS], "0");
        let reply = EchoMessage::decode(decode_unary(&body, 1024).unwrap()).unwrap();
        assert_eq!(reply.value, "ACK ping");
    }

    #[tokio::test]
    async fn unknown_method_reports_unimplemented() {
        let request = rpc_request("/echo.EchoService/Hello", encode_frame(&[]));
        let (body, trailers) = split(service().handle(request).await).await;
        assert!(body.is_empty());
        assert_eq!(
            RpcError::from_trailers(&trailers).unwrap().unwrap_err().code(),
            Code::Unimplemented
        );
    }

    #[tokio::test]
    async fn oversized_message_rejected() {
        let request = rpc_request("/echo.EchoService/Echo", encode_frame(&vec![0u8; 4096]));
        let (_, trailers) = split(service().handle(request).await).await;
        assert_eq!(
            RpcError::from_trailers(&trailers).unwrap().unwrap_err().code(),
            Code::ResourceExhausted
        );
    }

    #[test]
    fn unregistered_paths_share_a_metric_label() {
        let service = service();
        assert_eq!(
            service.metric_label("/echo.EchoService/Echo"),
            "/echo.EchoService/Echo"
        );
        assert_eq!(service.metric_label("/made.Up/Method1"), "unknown");
        assert_eq!(service.metric_label("/made.Up/Method2"), "unknown");
    }

    #[tokio::test]
    async fn non_rpc_requests_use_fallback_router() {
        let request = Request::builder()
            .uri("/plain")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service().handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"plain text");
    }

    #[test]
    fn content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_rpc_request(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_rpc_request(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        assert!(is_rpc_request(&headers));
    }
}
