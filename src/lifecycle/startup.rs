//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build TLS identity, method table and route table, in that order
//! - Bind the listener, then wire the gateway's upstream client to it
//!
//! # Design Decisions
//! - Fail fast: every error here is fatal and happens before accepting
//! - Subsystems initialize in order, not concurrently
//! - Unless an upstream address is configured, the gateway reaches this
//!   process's RPC handler over an in-memory pipe. The hop still runs TLS
//!   against the trust pool, and keeps working while the listener drains

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::classify::standard_classifier;
use crate::config::{validate_config, MuxConfig, TransportMode, ValidationError};
use crate::gateway::{auxiliary_router, text_router, BindingSet, GatewayState, RouteError, RouteTable};
use crate::http::server::{MuxServer, Transport};
use crate::net::listener::ListenerError;
use crate::net::tls::TlsError;
use crate::net::{Listener, TlsIdentity};
use crate::rpc::{
    standard_methods, Dialer, LocalHandler, RegistryError, RpcClient, RpcService, UpstreamTransport,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join(.0))]
    Config(Vec<ValidationError>),

    #[error("TLS material: {0}")]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build a ready-to-run server from configuration.
pub async fn build_server(config: &MuxConfig) -> Result<MuxServer, StartupError> {
    validate_config(config).map_err(StartupError::Config)?;

    let identity = match config.listener.transport {
        TransportMode::Tls => Some(TlsIdentity::load(&config.tls)?),
        TransportMode::Plaintext => {
            tracing::warn!("Plaintext transport selected; connections are not encrypted");
            None
        }
    };

    let methods = Arc::new(standard_methods(config.rpc.reflection)?);
    tracing::info!(
        methods = ?methods.methods().iter().map(|m| m.path()).collect::<Vec<_>>(),
        "Method table built"
    );

    let bindings = BindingSet::standard();
    let routes = RouteTable::build(&config.gateway.routes, &methods, |rpc| bindings.contains(rpc))?;
    tracing::info!(
        routes = ?routes.entries().iter().map(|e| e.label()).collect::<Vec<_>>(),
        "Route table built"
    );

    let listener = Listener::bind(&config.listener).await?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    let (transport, upstream_transport) = match &identity {
        Some(identity) => {
            let server_name = config
                .gateway
                .upstream_server_name
                .as_deref()
                .unwrap_or(&config.tls.server_name);
            (
                Transport::Tls(
                    identity.terminator(Duration::from_millis(config.tls.handshake_timeout_ms))?,
                ),
                UpstreamTransport::Tls(identity.connector(server_name)?),
            )
        }
        None => (Transport::Plaintext, UpstreamTransport::Plaintext),
    };

    let connect_timeout = Duration::from_secs(config.gateway.connect_timeout_secs);
    let upstream = match &config.gateway.upstream_address {
        Some(address) => {
            tracing::info!(upstream = %address, transport = transport.name(), "Gateway upstream configured");
            RpcClient::new(address.clone(), upstream_transport, connect_timeout)
        }
        None => {
            tracing::info!(transport = transport.name(), "Gateway upstream is in-process");
            let terminator = match &transport {
                Transport::Tls(terminator) => Some(terminator.clone()),
                Transport::Plaintext => None,
            };
            let local = RpcService::new(
                methods.clone(),
                auxiliary_router(),
                config.rpc.max_message_bytes,
            );
            RpcClient::new(local_addr.to_string(), upstream_transport, connect_timeout)
                .with_dialer(Dialer::InProcess(LocalHandler::new(local, terminator)))
        }
    }
    .with_max_message(config.rpc.max_message_bytes);

    let text = text_router(
        GatewayState {
            routes: Arc::new(routes),
            bindings,
            upstream: Arc::new(upstream),
            auxiliary: auxiliary_router(),
            max_body: config.gateway.max_body_bytes,
        },
        Duration::from_secs(config.gateway.request_timeout_secs),
    );
    let rpc = RpcService::new(methods, text.clone(), config.rpc.max_message_bytes);

    Ok(MuxServer::new(
        listener,
        transport,
        standard_classifier(&config.classifier),
        rpc,
        text,
        Duration::from_secs(config.shutdown.drain_timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn plaintext() -> MuxConfig {
        let mut config = MuxConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config.listener.transport = TransportMode::Plaintext;
        config
    }

    #[tokio::test]
    async fn plaintext_server_binds_ephemeral_port() {
        let server = build_server(&plaintext()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn ambiguous_routes_fail_before_binding() {
        let mut config = plaintext();
        config.gateway.routes.push(RouteConfig {
            method: "GET".into(),
            path: "/v1/echo/{other}".into(),
            rpc: "echo.EchoService/Echo".into(),
            body: None,
        });
        let err = build_server(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Route(RouteError::Ambiguous { .. })));
    }

    #[tokio::test]
    async fn missing_certificate_is_fatal() {
        let mut config = plaintext();
        config.listener.transport = TransportMode::Tls;
        config.tls.cert_path = "/nonexistent/server.crt".into();
        config.tls.key_path = "/nonexistent/server.key".into();
        let err = build_server(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Tls(_)));
    }

    #[tokio::test]
    async fn invalid_config_lists_every_problem() {
        let mut config = plaintext();
        config.listener.bind_address = "nowhere".into();
        config.classifier.max_peek_bytes = 1;
        match build_server(&config).await {
            Err(StartupError::Config(errors)) => assert!(errors.len() >= 2),
            other => panic!("expected config error, got {:?}", other.err()),
        }
    }
}
