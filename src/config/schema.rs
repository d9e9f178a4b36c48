//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the multiplexed server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MuxConfig {
    /// Listener configuration (bind address, transport mode).
    pub listener: ListenerConfig,

    /// TLS identity and trust pool locations.
    pub tls: TlsConfig,

    /// Connection classifier bounds.
    pub classifier: ClassifierConfig,

    /// RPC service handler settings.
    pub rpc: RpcConfig,

    /// Protocol translation gateway settings.
    pub gateway: GatewayConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// How bytes reach the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// TLS-terminated streams. The production configuration.
    #[default]
    Tls,
    /// Raw TCP streams. Degraded/test configuration only.
    Plaintext,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Tls => write!(f, "tls"),
            TransportMode::Plaintext => write!(f, "plaintext"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8042").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Transport beneath the classifier.
    pub transport: TransportMode,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8042".to_string(),
            max_connections: 10_000,
            transport: TransportMode::Tls,
        }
    }
}

/// TLS identity shared by the terminator and the gateway's upstream hop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: String,

    /// Path to private key (PEM).
    pub key_path: String,

    /// Path to the trust pool (PEM). Defaults to the certificate itself.
    pub trust_pool_path: Option<String>,

    /// Name the upstream hop expects in the server certificate.
    pub server_name: String,

    /// Handshake deadline in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl TlsConfig {
    /// Trust pool location, falling back to the served certificate.
    pub fn trust_pool(&self) -> &str {
        self.trust_pool_path.as_deref().unwrap_or(&self.cert_path)
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "certificates/server.crt".to_string(),
            key_path: "certificates/server.key".to_string(),
            trust_pool_path: None,
            server_name: "localhost".to_string(),
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Classifier bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum bytes buffered while deciding on a protocol.
    pub max_peek_bytes: usize,

    /// Deadline for the whole classification in milliseconds.
    pub peek_timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_peek_bytes: 4096,
            peek_timeout_ms: 5_000,
        }
    }
}

/// RPC service handler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Serve the method listing endpoint.
    pub reflection: bool,

    /// Largest accepted request message in bytes.
    pub max_message_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            reflection: true,
            max_message_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address of a remote RPC handler. When unset the gateway calls this
    /// process's handler over an in-memory pipe, still through TLS.
    pub upstream_address: Option<String>,

    /// Overrides `tls.server_name` for the upstream hop.
    pub upstream_server_name: Option<String>,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Upstream connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Largest accepted JSON body in bytes.
    pub max_body_bytes: usize,

    /// Route table mapping textual requests to RPC methods.
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_address: None,
            upstream_server_name: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            max_body_bytes: 1024 * 1024,
            routes: default_routes(),
        }
    }
}

/// A single gateway route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// HTTP method (e.g., "POST").
    pub method: String,

    /// Path pattern with `{name}` parameters (e.g., "/v1/echo/{value}").
    pub path: String,

    /// Target RPC method as "package.Service/Method".
    pub rpc: String,

    /// `"*"` binds the whole JSON body onto the request message.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            method: "POST".to_string(),
            path: "/v1/echo".to_string(),
            rpc: "echo.EchoService/Echo".to_string(),
            body: Some("*".to_string()),
        },
        RouteConfig {
            method: "GET".to_string(),
            path: "/v1/echo/{value}".to_string(),
            rpc: "echo.EchoService/Echo".to_string(),
            body: None,
        },
    ]
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight connections get to finish before being aborted.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
