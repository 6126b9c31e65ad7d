//! # meshrpc CLI Entry Point
//!
//! Runs a node hosting a small demo service, or talks to a running node over
//! its HTTP listener.
//!
//! ## Usage
//!
//! ```bash
//! # Start a node with auto-assigned ports
//! meshrpc serve --name worker-1
//!
//! # Start a node that registers with a watcher, TCP only
//! meshrpc serve --name worker-2 --directory 10.0.0.2:7000 --udp-port 0 --http-port 0
//!
//! # Liveness probe
//! meshrpc ping http://127.0.0.1:8080
//!
//! # One call; the body is sent as JSON
//! meshrpc call http://127.0.0.1:8080 Echo.Upper --args '"hello"'
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use meshrpc_common::protocol::Encoding;
use meshrpc_common::transport::http::{HttpTransport, CODE_HEADER, PING_PATH};
use meshrpc_node::config::{NodeConfig, PortSetting};
use meshrpc_node::node::Node;
use meshrpc_node::service::{ServiceBuilder, ServiceDescriptor};

/// Validates that a URL string starts with http://
fn validate_http_url(url: &str) -> Result<()> {
    if url.starts_with("http://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid node address: '{}' must start with http://", url))
    }
}

#[derive(FromArgs)]
/// meshrpc - peer-to-peer RPC nodes
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Ping(PingArgs),
    Call(CallArgs),
}

/// Arguments for running a node.
///
/// Flags override the values loaded from `--config`. A port of 0 disables
/// that transport; an omitted port is auto-assigned.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run a node hosting the Echo demo service
struct ServeArgs {
    /// path to a JSON node configuration
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// node name, usable as a call qualifier by other nodes
    #[argh(option, short = 'n')]
    name: Option<String>,

    /// host to bind and advertise
    #[argh(option)]
    host: Option<String>,

    /// TCP listener port
    #[argh(option, long = "tcp-port")]
    tcp_port: Option<u16>,

    /// UDP listener port
    #[argh(option, long = "udp-port")]
    udp_port: Option<u16>,

    /// HTTP listener port
    #[argh(option, long = "http-port")]
    http_port: Option<u16>,

    /// watcher address (host:port); repeat for slaves, master first
    #[argh(option, short = 'd', long = "directory")]
    directory: Vec<String>,
}

impl ServeArgs {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path).with_context(|| format!("loading config {}", path))?,
            None => NodeConfig::default(),
        };
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if self.tcp_port.is_some() {
            config.tcp_port = PortSetting::from_port(self.tcp_port);
        }
        if self.udp_port.is_some() {
            config.udp_port = PortSetting::from_port(self.udp_port);
        }
        if self.http_port.is_some() {
            config.http_port = PortSetting::from_port(self.http_port);
        }
        if !self.directory.is_empty() {
            config.directory = self.directory.clone();
        }
        Ok(config)
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "ping")]
/// check that a node's HTTP listener answers
struct PingArgs {
    /// node HTTP address, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    address: String,
}

/// Arguments for one HTTP call.
///
/// The result body is printed to stdout as received; failures go to stderr
/// with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a Service.Method on a node over HTTP
struct CallArgs {
    /// node HTTP address, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    address: String,

    /// api name, Service.Method
    #[argh(positional)]
    method: String,

    /// JSON request body
    #[argh(option, short = 'a', long = "args", default = "\"null\".into()")]
    args: String,

    /// call timeout in milliseconds
    #[argh(option, long = "timeout-ms", default = "10000")]
    timeout_ms: u64,
}

struct Echo;

/// Demo service. JSON-encoded so `meshrpc call` can talk to it directly.
fn echo_service() -> Result<ServiceDescriptor> {
    let descriptor = ServiceBuilder::new("Echo", Echo)
        .declare(Encoding::JSON_MARKER)
        .call("Say", |_: &Echo, text: String| Ok::<_, String>(text))
        .call("Upper", |_: &Echo, text: String| Ok::<_, String>(text.to_uppercase()))
        .multi("Join", |_: &Echo, (a, b): (String, String)| Ok::<_, String>(format!("{}{}", a, b)))
        .send("Log", |_: &Echo, line: String| {
            tracing::info!("Echo.Log: {}", line);
            Ok::<_, String>(())
        })
        .build()?;
    Ok(descriptor)
}

async fn post(url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
    let client = Client::builder(TokioExecutor::new()).build_http();
    let request = Request::builder()
        .method("POST")
        .uri(url)
        .body(Full::new(Bytes::from(body)))?;

    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .with_context(|| format!("no answer from {} within {:?}", url, timeout))??;
    let code = response
        .headers()
        .get(CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response.into_body().collect().await?.to_bytes();
    Ok(HttpTransport::into_result(code.as_deref(), body)?)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.node_config()?;
    let node = Node::builder(config).service(echo_service()?).start().await?;
    let identity = node.identity();
    tracing::info!(
        "Serving Echo as {} (tcp={} udp={} http={})",
        identity.uuid,
        identity.tcp_port,
        identity.udp_port,
        identity.http_port
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for piping.
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Ping(args) => {
            validate_http_url(&args.address)?;
            let url = format!("{}{}", args.address.trim_end_matches('/'), PING_PATH);
            let body = post(&url, Vec::new(), Duration::from_secs(3)).await?;
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
        Commands::Call(args) => {
            validate_http_url(&args.address)?;
            serde_json::from_str::<serde_json::Value>(&args.args)
                .with_context(|| format!("--args is not valid JSON: {}", args.args))?;
            let url = format!(
                "{}{}",
                args.address.trim_end_matches('/'),
                HttpTransport::path_for(&args.method)
            );
            let body = post(&url, args.args.into_bytes(), Duration::from_millis(args.timeout_ms)).await?;
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
    }
}
