//! TLS identity, termination and the upstream connector.
//!
//! The certificate chain, private key and trust pool are loaded once into a
//! [`TlsIdentity`]. The terminator and the gateway's upstream connector are
//! both derived from that one value, so the upstream hop authenticates the
//! RPC handler against the same trust pool the listener serves from.

use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;

/// ALPN protocols offered by the terminator. Order matters: h2 is preferred.
pub const ALPN_PROTOCOLS: &[&[u8]] = &[b"h2", b"http/1.1"];

/// Startup-time failure to build TLS material. Always fatal.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("invalid server name '{0}'")]
    ServerName(String),

    #[error("rustls rejected the configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Per-connection handshake failure. Logged, never fatal to the listener.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer aborted the handshake: {0}")]
    PeerAborted(io::Error),

    #[error("handshake rejected: {0}")]
    Rejected(io::Error),
}

impl HandshakeError {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => HandshakeError::PeerAborted(err),
            _ => HandshakeError::Rejected(err),
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::Timeout(_) => "timeout",
            HandshakeError::PeerAborted(_) => "peer_aborted",
            HandshakeError::Rejected(_) => "rejected",
        }
    }
}

/// Negotiated application protocol from ALPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlpnHint {
    /// HTTP/2 was negotiated
    H2,
    /// HTTP/1.1 was negotiated
    Http1,
    /// No ALPN negotiation occurred (plaintext, or the peer offered nothing)
    #[default]
    None,
}

impl AlpnHint {
    /// Determine the negotiated protocol from ALPN data.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(b"h2") => AlpnHint::H2,
            Some(b"http/1.1") => AlpnHint::Http1,
            _ => AlpnHint::None,
        }
    }
}

/// Certificate chain, key and trust pool, loaded once at startup.
#[derive(Debug)]
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    roots: Arc<RootCertStore>,
}

impl TlsIdentity {
    /// Load the identity described by the configuration.
    pub fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let certs = load_certs(Path::new(&config.cert_path))?;
        let key = load_private_key(Path::new(&config.key_path))?;
        let trust = load_certs(Path::new(config.trust_pool()))?;
        Self::from_parts(certs, key, trust)
    }

    /// Build an identity from in-memory PEM blobs.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], trust_pem: &[u8]) -> Result<Self, TlsError> {
        let certs = parse_certs(cert_pem, "<memory>")?;
        let key = parse_private_key(key_pem, "<memory>")?;
        let trust = parse_certs(trust_pem, "<memory>")?;
        Self::from_parts(certs, key, trust)
    }

    fn from_parts(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        trust: Vec<CertificateDer<'static>>,
    ) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in trust {
            roots.add(cert)?;
        }
        Ok(Self {
            certs,
            key,
            roots: Arc::new(roots),
        })
    }

    /// Build the server-side terminator.
    pub fn terminator(&self, handshake_timeout: Duration) -> Result<TlsTerminator, TlsError> {
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

        tracing::info!(
            alpn = ?config
                .alpn_protocols
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>(),
            "TLS terminator configured"
        );

        Ok(TlsTerminator {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            handshake_timeout,
        })
    }

    /// Build the client-side connector trusting this identity's pool.
    pub fn connector(&self, server_name: &str) -> Result<UpstreamTls, TlsError> {
        UpstreamTls::new(Arc::clone(&self.roots), server_name)
    }
}

/// Accepts raw connections and yields decrypted streams.
#[derive(Clone)]
pub struct TlsTerminator {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsTerminator {
    /// Perform the handshake, returning the stream and the ALPN hint.
    pub async fn accept<S>(&self, stream: S) -> Result<(TlsStream<S>, AlpnHint), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let tls = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| HandshakeError::Timeout(self.handshake_timeout))?
            .map_err(HandshakeError::from_io)?;

        let hint = AlpnHint::from_alpn(tls.get_ref().1.alpn_protocol());
        Ok((tls, hint))
    }
}

/// TLS settings for the gateway's hop to the RPC handler.
#[derive(Clone)]
pub struct UpstreamTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    name: String,
}

impl UpstreamTls {
    /// Build a connector that only trusts `roots` and expects `server_name`.
    pub fn new(roots: Arc<RootCertStore>, server_name: &str) -> Result<Self, TlsError> {
        let name = server_name.to_string();
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| TlsError::ServerName(name.clone()))?;

        let mut config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            name,
        })
    }

    /// Load a trust pool from disk and build a connector from it.
    pub fn from_trust_pool(path: &Path, server_name: &str) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(path)? {
            roots.add(cert)?;
        }
        Self::new(Arc::new(roots), server_name)
    }

    /// Wrap an outbound stream.
    pub async fn connect<S>(&self, stream: S) -> io::Result<ClientTlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.connector.connect(self.server_name.clone(), stream).await
    }

    /// The name presented for certificate verification.
    pub fn server_name(&self) -> &str {
        &self.name
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Load certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    parse_certs(&read_file(path)?, &path.display().to_string())
}

/// Load private key from a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    parse_private_key(&read_file(path)?, &path.display().to_string())
}

fn parse_certs(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|cert| cert.ok())
        .collect();
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(origin.to_string()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(pem);
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(key),
        Ok(None) | Err(_) => Err(TlsError::NoPrivateKey(origin.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_hint_from_negotiation() {
        assert_eq!(AlpnHint::from_alpn(Some(b"h2")), AlpnHint::H2);
        assert_eq!(AlpnHint::from_alpn(Some(b"http/1.1")), AlpnHint::Http1);
        assert_eq!(AlpnHint::from_alpn(None), AlpnHint::None);
        assert_eq!(AlpnHint::from_alpn(Some(b"unknown")), AlpnHint::None);
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let err = TlsIdentity::from_pem(b"not pem", b"not pem", b"not pem").unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[test]
    fn missing_certificate_file_is_read_error() {
        let config = TlsConfig {
            cert_path: "/nonexistent/server.crt".into(),
            ..TlsConfig::default()
        };
        assert!(matches!(
            TlsIdentity::load(&config),
            Err(TlsError::Read { .. })
        ));
    }

    #[test]
    fn self_signed_identity_builds_both_sides() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = generated.cert.pem();
        let key = generated.key_pair.serialize_pem();

        let identity = TlsIdentity::from_pem(cert.as_bytes(), key.as_bytes(), cert.as_bytes()).unwrap();
        assert!(identity.terminator(Duration::from_secs(1)).is_ok());

        let upstream = identity.connector("localhost").unwrap();
        assert_eq!(upstream.server_name(), "localhost");
    }
}
