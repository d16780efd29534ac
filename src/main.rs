//! Demo programs for the three service surfaces: an HTTP echo pair, a TCP
//! echo pair, and an input/output pipe node pair.

use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use netfabric::api::{ApiClient, ApiClientConfig, ApiHandler, ApiServer, ApiServerConfig};
use netfabric::encoding::{self, Encoding, JSON_MIME};
use netfabric::pipe::{PipeNode, PipeNodeConfig};
use netfabric::tcp::{TcpClient, TcpClientConfig, TcpHandler, TcpServer, TcpServerConfig};

#[derive(Parser)]
#[command(name = "netfabric")]
#[command(about = "netfabric demo services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP echo server on :9999
    ApiServer,
    /// POST a sample payload to the HTTP echo server
    ApiClient,
    /// Run the TCP echo server on :9998
    TcpServer,
    /// Send a sample payload to the TCP echo server
    TcpClient,
    /// Run an input pipe node listening on :9997
    PipeIn,
    /// Run an output pipe node dialing :9997
    PipeOut,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    surname: String,
    #[serde(default)]
    age: u32,
}

fn sample_person() -> Person {
    Person {
        id: "1".to_string(),
        name: "Fabrizio".to_string(),
        surname: "Torelli".to_string(),
        age: 45,
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    netfabric::runtime::configure_from_env();
    let cli = Cli::parse();
    match cli.command {
        Commands::ApiServer => api_server(),
        Commands::ApiClient => api_client(),
        Commands::TcpServer => tcp_server(),
        Commands::TcpClient => tcp_client(),
        Commands::PipeIn => pipe_in(),
        Commands::PipeOut => pipe_out(),
    }
}

fn api_server() -> anyhow::Result<()> {
    let server = ApiServer::new();
    server.init(ApiServerConfig {
        port: 9999,
        ..Default::default()
    })?;
    let handler = ApiHandler::builder()
        .with_path("/")
        .on(Method::POST, |ctx| {
            let request: Person = match ctx.parse_body() {
                Ok(person) => person,
                Err(err) => {
                    warn!(error = %err, "post data read error");
                    Person::default()
                }
            };
            info!(?request, "post data");
            ctx.write_response(&sample_person(), StatusCode::OK)
        })
        .build()?;
    server.add_path(handler)?;
    server.start()?;
    server.wait();
    Ok(())
}

fn api_client() -> anyhow::Result<()> {
    let mut client = ApiClient::new();
    client.connect(ApiClientConfig {
        host: "localhost".to_string(),
        port: 9999,
        ..Default::default()
    })?;
    let body = encoding::marshal(Encoding::Json, &sample_person())?;
    info!(request = %String::from_utf8_lossy(&body), "sending request");
    let response = client.call("/", Method::POST, Some(JSON_MIME), Some(JSON_MIME), body)?;
    info!(status = %response.status(), "response received");
    let data = response.bytes().context("reading response body")?;
    let person: Person = encoding::unmarshal(Encoding::Json, &data)?;
    info!(?person, "response data");
    Ok(())
}

fn tcp_server() -> anyhow::Result<()> {
    let server = TcpServer::new();
    server.init(TcpServerConfig {
        port: 9998,
        ..Default::default()
    })?;
    let handler = TcpHandler::builder()
        .with_name("Main")
        .with_action("read-sample-data", |ctx| {
            info!("request handler Main.read-sample-data");
            let request: Person = match ctx.parse_request() {
                Ok(person) => person,
                Err(err) => {
                    warn!(error = %err, "main data read error");
                    Person::default()
                }
            };
            info!(?request, "main data");
            ctx.write_response(&sample_person())?;
            info!("answer sent");
            Ok(())
        })
        .build()?;
    server.add_path(handler)?;
    server.start()?;
    server.wait();
    Ok(())
}

fn tcp_client() -> anyhow::Result<()> {
    let mut client = TcpClient::new();
    client.connect(TcpClientConfig {
        host: "localhost".to_string(),
        port: 9998,
        ..Default::default()
    })?;
    let sample = sample_person();
    info!(?sample, "request data");
    client.encode(&sample, Duration::ZERO)?;
    let response: Person = client.read_remote(Duration::from_secs(20))?;
    info!(?response, "response data");
    client.close()?;
    Ok(())
}

fn pipe_in() -> anyhow::Result<()> {
    let node = PipeNode::new();
    node.init(PipeNodeConfig {
        in_port: 9997,
        ..Default::default()
    })?;
    node.start()?;
    node.until_started();
    let incoming = node
        .incoming()
        .context("inbound channel already taken")?;
    info!("start message network reader");
    for message in incoming.iter() {
        warn!(message = %String::from_utf8_lossy(&message), "received message");
    }
    node.stop()?;
    node.wait();
    Ok(())
}

fn pipe_out() -> anyhow::Result<()> {
    let node = PipeNode::new();
    node.init(PipeNodeConfig {
        out_port: 9997,
        ..Default::default()
    })?;
    node.start()?;
    node.until_started();
    let outgoing = node.outgoing().context("outbound channel closed")?;
    let mut count = 0u64;
    loop {
        count += 1;
        let message = format!("This is message # {count}");
        info!(message = %message, "sending message");
        if outgoing.send(message.into_bytes()).is_err() {
            break;
        }
        std::thread::sleep(Duration::from_secs(2));
    }
    node.stop()?;
    node.wait();
    Ok(())
}
