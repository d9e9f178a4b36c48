//! Command-line client for an rpcmux server.
//!
//! `echo` and `list` speak RPC over HTTP/2; `rest` goes through the JSON
//! gateway on the same port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use rpcmux::net::UpstreamTls;
use rpcmux::rpc::echo::{self, EchoMessage};
use rpcmux::rpc::reflection::{self, ListMethodsRequest, ListMethodsResponse};
use rpcmux::rpc::registry::method_path;
use rpcmux::rpc::{RpcClient, UpstreamTransport};

#[derive(Parser)]
#[command(name = "echo-client")]
#[command(about = "Call the echo service over RPC or through the gateway", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "localhost:8042")]
    address: String,

    /// PEM trust pool used to verify the server
    #[arg(short, long, default_value = "certificates/server.crt")]
    trust_pool: PathBuf,

    /// Name expected in the server certificate
    #[arg(short, long, default_value = "localhost")]
    server_name: String,

    /// Talk to a plaintext server
    #[arg(long)]
    plaintext: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call echo.EchoService/Echo over RPC
    Echo {
        #[arg(default_value = "world")]
        value: String,
    },
    /// POST /v1/echo through the JSON gateway
    Rest {
        #[arg(default_value = "world")]
        value: String,
    },
    /// List the server's RPC methods
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_client=info,rpcmux=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Echo { value } => {
            let client = rpc_client(&cli)?;
            let reply: EchoMessage = client
                .unary(
                    &method_path(echo::SERVICE, echo::ECHO),
                    &EchoMessage {
                        value: value.clone(),
                    },
                    None,
                )
                .await?;
            println!("{}", reply.value);
        }
        Commands::Rest { value } => {
            let reply = rest_echo(&cli, value).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::List => {
            let client = rpc_client(&cli)?;
            let listing: ListMethodsResponse = client
                .unary(
                    &method_path(reflection::SERVICE, reflection::LIST_METHODS),
                    &ListMethodsRequest {},
                    None,
                )
                .await?;
            for method in listing.methods {
                let request = method.request.map(|m| m.name).unwrap_or_default();
                let response = method.response.map(|m| m.name).unwrap_or_default();
                println!("{}({}) returns ({})", method.path, request, response);
            }
        }
    }

    Ok(())
}

fn rpc_client(cli: &Cli) -> Result<RpcClient, Box<dyn std::error::Error>> {
    let transport = if cli.plaintext {
        UpstreamTransport::Plaintext
    } else {
        UpstreamTransport::Tls(UpstreamTls::from_trust_pool(&cli.trust_pool, &cli.server_name)?)
    };
    Ok(RpcClient::new(cli.address.clone(), transport, Duration::from_secs(5)))
}

async fn rest_echo(cli: &Cli, value: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let (url, client) = if cli.plaintext {
        (
            format!("http://{}/v1/echo", cli.address),
            reqwest::Client::builder().build()?,
        )
    } else {
        let addr = tokio::net::lookup_host(&cli.address)
            .await?
            .next()
            .ok_or_else(|| format!("{} did not resolve", cli.address))?;
        (tls_url(&cli.server_name, addr), tls_client(cli, addr)?)
    };

    let response = client
        .post(url)
        .json(&json!({ "value": value }))
        .send()
        .await?;

    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        return Err(format!("gateway returned {}: {}", status, body).into());
    }
    Ok(body)
}

/// Certificates are issued for the server name, so the URL names it while
/// the client is pinned to the resolved `--address`.
fn tls_url(server_name: &str, addr: SocketAddr) -> String {
    format!("https://{}:{}/v1/echo", server_name, addr.port())
}

fn tls_client(cli: &Cli, addr: SocketAddr) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
    let pem = std::fs::read(&cli.trust_pool)?;
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .http1_only()
        .tls_built_in_root_certs(false)
        .resolve(&cli.server_name, addr);
    for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_url_keeps_the_address_port() {
        let addr: SocketAddr = "10.0.0.5:9443".parse().unwrap();
        assert_eq!(tls_url("localhost", addr), "https://localhost:9443/v1/echo");
    }
}
