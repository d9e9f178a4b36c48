//! HTTP/2 RPC client.
//!
//! # Responsibilities
//! - Dial the RPC handler over TLS (shared trust pool) or plaintext
//! - Cache one HTTP/2 connection and re-establish it after failures
//! - Separate application errors (status in trailers) from transport failures
//!
//! # Design Decisions
//! - A transport failure is retried once on a fresh connection
//! - Application errors are returned as-is and never retried
//! - The request id travels in `x-request-id`
//! - The cache lock is never held across I/O; callers that need a new
//!   connection share one dial
//! - A handler in the same process is reached over an in-memory pipe that
//!   still goes through TLS, and does not see the server's drain

use std::time::Duration;

use axum::http::{header, HeaderValue, Method, Request, StatusCode, Uri};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::io::DuplexStream;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::http::request::X_REQUEST_ID;
use crate::net::{TlsTerminator, UpstreamTls};
use crate::rpc::codec::{decode_unary, encode_frame, DEFAULT_MAX_MESSAGE};
use crate::rpc::service::{RpcService, RPC_CONTENT_TYPE};
use crate::rpc::status::{Code, RpcError};

/// Why the upstream could not be reached or did not answer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("TLS handshake with {server_name} failed: {source}")]
    Tls {
        server_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP/2 error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] axum::http::Error),
}

/// Outcome of a failed call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The method ran and returned an error status.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The call never produced a status.
    #[error("upstream unavailable: {0}")]
    Transport(#[from] TransportError),
}

/// How the client reaches the RPC handler.
#[derive(Clone)]
pub enum UpstreamTransport {
    Plaintext,
    Tls(UpstreamTls),
}

impl UpstreamTransport {
    fn scheme(&self) -> &'static str {
        match self {
            UpstreamTransport::Plaintext => "http",
            UpstreamTransport::Tls(_) => "https",
        }
    }
}

/// Buffer size of each direction of an in-process pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Where connections come from.
#[derive(Clone)]
pub enum Dialer {
    /// TCP to the client's address.
    Tcp,
    /// An in-memory pipe into a handler in this process.
    InProcess(LocalHandler),
}

/// The server side of in-process connections.
#[derive(Clone)]
pub struct LocalHandler {
    service: RpcService,
    terminator: Option<TlsTerminator>,
}

impl LocalHandler {
    /// `terminator` must be set when the client uses TLS.
    pub fn new(service: RpcService, terminator: Option<TlsTerminator>) -> Self {
        Self {
            service,
            terminator,
        }
    }

    fn spawn(&self, stream: DuplexStream) {
        let handler = self.clone();
        tokio::spawn(async move {
            // Held for the life of the connection so it never drains.
            let (_undrained, drain) = watch::channel(false);
            let result = match &handler.terminator {
                Some(terminator) => match terminator.accept(stream).await {
                    Ok((tls, _)) => handler.service.serve_connection(tls, drain).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "In-process TLS handshake failed");
                        return;
                    }
                },
                None => handler.service.serve_connection(stream, drain).await,
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "In-process connection ended with error");
            }
        });
    }
}

/// Unary RPC client over one cached HTTP/2 connection.
pub struct RpcClient {
    address: String,
    transport: UpstreamTransport,
    dialer: Dialer,
    connect_timeout: Duration,
    max_message: usize,
    sender: Mutex<Option<SendRequest<Full<Bytes>>>>,
    dialing: Mutex<()>,
}

impl RpcClient {
    pub fn new(address: impl Into<String>, transport: UpstreamTransport, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            transport,
            dialer: Dialer::Tcp,
            connect_timeout,
            max_message: DEFAULT_MAX_MESSAGE,
            sender: Mutex::new(None),
            dialing: Mutex::new(()),
        }
    }

    /// Reach the handler through `dialer`. `address` stays the URI authority.
    pub fn with_dialer(mut self, dialer: Dialer) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Call a method with typed messages.
    pub async fn unary<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        request_id: Option<&str>,
    ) -> Result<Resp, CallError>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let payload = Bytes::from(request.encode_to_vec());
        let reply = self.call_raw(path, payload, request_id).await?;
        Resp::decode(reply).map_err(|e| {
            CallError::Rpc(RpcError::internal(format!("malformed response: {}", e)))
        })
    }

    /// Call a method with an encoded request, retrying once on transport failure.
    pub async fn call_raw(
        &self,
        path: &str,
        payload: Bytes,
        request_id: Option<&str>,
    ) -> Result<Bytes, CallError> {
        match self.attempt(path, payload.clone(), request_id).await {
            Err(CallError::Transport(err)) => {
                tracing::warn!(
                    upstream = %self.address,
                    method = %path,
                    error = %err,
                    "Upstream transport failure, retrying on a fresh connection"
                );
                self.reset().await;
                let outcome = self.attempt(path, payload, request_id).await;
                if matches!(outcome, Err(CallError::Transport(_))) {
                    self.reset().await;
                }
                outcome
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        path: &str,
        payload: Bytes,
        request_id: Option<&str>,
    ) -> Result<Bytes, CallError> {
        let mut sender = self.sender().await?;

        let uri: Uri = format!("{}://{}{}", self.transport.scheme(), self.address, path)
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| {
                CallError::Rpc(RpcError::invalid_argument(format!("bad method path: {}", e)))
            })?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, RPC_CONTENT_TYPE)
            .header(header::TE, "trailers");
        if let Some(id) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            builder = builder.header(X_REQUEST_ID, id);
        }
        let request = builder
            .body(Full::new(encode_frame(&payload)))
            .map_err(TransportError::from)?;

        let response = sender
            .send_request(request)
            .await
            .map_err(TransportError::from)?;

        // Trailers-only responses carry the status in the headers.
        if let Some(Err(err)) = RpcError::from_trailers(response.headers()) {
            return Err(err.into());
        }
        if response.status() != StatusCode::OK {
            return Err(RpcError::new(
                Code::Unknown,
                format!("upstream answered HTTP {}", response.status()),
            )
            .into());
        }

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(TransportError::from)?;
        let status = collected
            .trailers()
            .and_then(RpcError::from_trailers)
            .ok_or_else(|| RpcError::internal("response carried no status"))?;
        status?;

        let body = collected.to_bytes();
        Ok(decode_unary(&body, self.max_message).map_err(RpcError::from)?)
    }

    /// A ready sender, dialing if the cached one is gone.
    async fn sender(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        if let Some(sender) = self.cached().await {
            return Ok(sender);
        }

        let _dialing = self.dialing.lock().await;
        // Someone else may have dialed while we waited.
        if let Some(sender) = self.cached().await {
            return Ok(sender);
        }
        let sender = self.connect().await?;
        *self.sender.lock().await = Some(sender.clone());
        Ok(sender)
    }

    async fn cached(&self) -> Option<SendRequest<Full<Bytes>>> {
        let mut sender = self.sender.lock().await.clone()?;
        if sender.is_closed() {
            return None;
        }
        sender.ready().await.ok()?;
        Some(sender)
    }

    async fn reset(&self) {
        *self.sender.lock().await = None;
    }

    /// Dial, secure and handshake, all under `connect_timeout`.
    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        tokio::time::timeout(self.connect_timeout, self.dial())
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: self.address.clone(),
                timeout: self.connect_timeout,
            })?
    }

    async fn dial(&self) -> Result<SendRequest<Full<Bytes>>, TransportError> {
        match &self.dialer {
            Dialer::Tcp => {
                let tcp = TcpStream::connect(&self.address)
                    .await
                    .map_err(|source| TransportError::Connect {
                        address: self.address.clone(),
                        source,
                    })?;
                let _ = tcp.set_nodelay(true);
                self.secure(tcp).await
            }
            Dialer::InProcess(handler) => {
                let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
                handler.spawn(server);
                self.secure(client).await
            }
        }
    }

    async fn secure<S>(&self, stream: S) -> Result<SendRequest<Full<Bytes>>, TransportError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        match &self.transport {
            UpstreamTransport::Plaintext => handshake(stream).await,
            UpstreamTransport::Tls(tls) => {
                let stream = tls.connect(stream).await.map_err(|source| TransportError::Tls {
                    server_name: tls.server_name().to_string(),
                    source,
                })?;
                handshake(stream).await
            }
        }
    }
}

async fn handshake<S>(stream: S) -> Result<SendRequest<Full<Bytes>>, TransportError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Upstream connection closed");
        }
    });
    Ok(sender)
}

/// Something the gateway can send RPC calls to.
pub trait Upstream: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        path: &'a str,
        payload: Bytes,
        request_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Bytes, CallError>>;
}

impl Upstream for RpcClient {
    fn call<'a>(
        &'a self,
        path: &'a str,
        payload: Bytes,
        request_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Bytes, CallError>> {
        Box::pin(self.call_raw(path, payload, request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::echo::{self, EchoMessage};
    use crate::rpc::registry::MethodTable;
    use crate::net::TlsIdentity;
    use axum::Router;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_server() -> String {
        let table = echo::register(MethodTable::builder()).build().unwrap();
        let service = RpcService::new(Arc::new(table), Router::new(), DEFAULT_MAX_MESSAGE);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);

        tokio::spawn(async move {
            let _drain = tx;
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let service = service.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    let _ = service.serve_connection(stream, rx).await;
                });
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn unary_call_over_plaintext() {
        let address = spawn_server().await;
        let client = RpcClient::new(address, UpstreamTransport::Plaintext, Duration::from_secs(1));

        let reply: EchoMessage = client
            .unary(
                "/echo.EchoService/Echo",
                &EchoMessage {
                    value: "ping".into(),
                },
                Some("req-1"),
            )
            .await
            .unwrap();
        assert_eq!(reply.value, "ACK ping");
    }

    #[tokio::test]
    async fn application_error_is_not_transport() {
        let address = spawn_server().await;
        let client = RpcClient::new(address, UpstreamTransport::Plaintext, Duration::from_secs(1));

        let err = client
            .call_raw("/echo.EchoService/Missing", Bytes::new(), None)
            .await
            .unwrap_err();
        match err {
            CallError::Rpc(e) => assert_eq!(e.code(), Code::Unimplemented),
            other => panic!("expected RPC error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RpcClient::new(address, UpstreamTransport::Plaintext, Duration::from_secs(1));
        let err = client
            .call_raw("/echo.EchoService/Echo", Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[tokio::test]
    async fn in_process_call_goes_through_tls() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = certified.cert.pem();
        let key_pem = certified.key_pair.serialize_pem();
        let identity =
            TlsIdentity::from_pem(cert_pem.as_bytes(), key_pem.as_bytes(), cert_pem.as_bytes())
                .unwrap();

        let table = echo::register(MethodTable::builder()).build().unwrap();
        let service = RpcService::new(Arc::new(table), Router::new(), DEFAULT_MAX_MESSAGE);
        let handler = LocalHandler::new(
            service,
            Some(identity.terminator(Duration::from_secs(1)).unwrap()),
        );
        let client = RpcClient::new(
            "localhost",
            UpstreamTransport::Tls(identity.connector("localhost").unwrap()),
            Duration::from_secs(1),
        )
        .with_dialer(Dialer::InProcess(handler));

        for value in ["one", "two"] {
            let reply: EchoMessage = client
                .unary(
                    "/echo.EchoService/Echo",
                    &EchoMessage {
                        value: value.into(),
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(reply.value, format!("ACK {value}"));
        }
    }

    #[tokio::test]
    async fn stalled_dial_leaves_the_cache_unlocked() {
        // Accepts TCP but never answers the TLS handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let tls = UpstreamTls::new(Arc::new(rustls::RootCertStore::empty()), "localhost").unwrap();
        let client = Arc::new(RpcClient::new(
            address,
            UpstreamTransport::Tls(tls),
            Duration::from_millis(300),
        ));

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call_raw("/echo.EchoService/Echo", Bytes::new(), None)
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(client.dialing.try_lock().is_err());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), client.sender.lock())
                .await
                .is_ok()
        );

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            CallError::Transport(TransportError::ConnectTimeout { .. })
        ));
    }
}
