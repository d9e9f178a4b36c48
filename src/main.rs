//! rpcmux server.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                       RPCMUX                          │
//!                  │                                                       │
//!   TCP :8042      │  ┌──────────┐   ┌─────┐   ┌────────────┐             │
//!  ────────────────┼─▶│ listener │──▶│ TLS │──▶│ classifier │             │
//!                  │  └──────────┘   └─────┘   └─────┬──────┘             │
//!                  │                    preface/ALPN │   request line     │
//!                  │                   ┌─────────────┴─────────┐          │
//!                  │                   ▼                       ▼          │
//!                  │           ┌──────────────┐        ┌──────────────┐   │
//!                  │           │ RPC handler  │◀───────│   gateway    │   │
//!                  │           │  (HTTP/2)    │  TLS   │  (HTTP/1)    │   │
//!                  │           └──────────────┘  hop   └──────┬───────┘   │
//!                  │                                          ▼           │
//!                  │                                   auxiliary router   │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use rpcmux::config::{load_config, MuxConfig, TransportMode};
use rpcmux::lifecycle::{build_server, spawn_signal_handler, Shutdown};
use rpcmux::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "rpcmux")]
#[command(about = "Serve an RPC service and its JSON gateway on one port", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Serve without TLS (testing only)
    #[arg(long)]
    plaintext: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MuxConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if cli.plaintext {
        config.listener.transport = TransportMode::Plaintext;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rpcmux starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        transport = %config.listener.transport,
        max_connections = config.listener.max_connections,
        routes = config.gateway.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = build_server(&config).await?;
    tracing::info!(address = %server.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    server.run(stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
