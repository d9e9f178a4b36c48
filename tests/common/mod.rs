//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rpcmux::config::{MuxConfig, TransportMode};
use rpcmux::lifecycle::{build_server, Shutdown};
use rpcmux::net::listener::ListenerError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// A throwaway self-signed certificate for `localhost`, written to disk.
pub struct TestCerts {
    dir: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
}

impl TestCerts {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = certified.cert.pem();
        let key_pem = certified.key_pair.serialize_pem();

        let dir = std::env::temp_dir().join(format!("rpcmux-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("server.crt");
        let key_path = dir.join("server.key");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();

        Self {
            dir,
            cert_path,
            key_path,
            cert_pem,
        }
    }
}

impl Drop for TestCerts {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn plaintext_config() -> MuxConfig {
    let mut config = MuxConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.transport = TransportMode::Plaintext;
    config.shutdown.drain_timeout_secs = 5;
    config
}

pub fn tls_config(certs: &TestCerts) -> MuxConfig {
    let mut config = plaintext_config();
    config.listener.transport = TransportMode::Tls;
    config.tls.cert_path = certs.cert_path.display().to_string();
    config.tls.key_path = certs.key_path.display().to_string();
    config.tls.server_name = "localhost".into();
    config
}

/// A server running in the background.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ListenerError>>,
}

impl RunningServer {
    pub async fn start(config: MuxConfig) -> Self {
        let server = build_server(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();
        let handle = tokio::spawn(server.run(stop));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, scheme: &str, path: &str) -> String {
        format!("{}://localhost:{}{}", scheme, self.addr.port(), path)
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Send raw bytes and read until the server closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap_or_default();
    response
}
