//! Graceful lifecycle: stop/wait drain bounds, lifecycle preconditions and
//! restart on a fresh state machine.

mod common;

use std::time::{Duration, Instant};

use common::fast_timeouts;
use netfabric::tcp::{TcpHandler, TcpServer, TcpServerConfig};
use netfabric::Error;

fn echo_handler(name: &str) -> TcpHandler {
    TcpHandler::builder()
        .with_name(name)
        .with_action("noop", |_ctx| Ok(()))
        .build()
        .unwrap()
}

fn started_server() -> TcpServer {
    let server = TcpServer::new();
    server
        .init(TcpServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeouts: fast_timeouts(),
            ..Default::default()
        })
        .unwrap();
    server.add_path(echo_handler("Main")).unwrap();
    server.start().unwrap();
    server
}

#[test]
fn test_stop_then_wait_returns_within_bounds() {
    let server = started_server();
    assert!(server.running());

    server.stop().unwrap();
    assert!(!server.running());

    let timeouts = fast_timeouts();
    let ceiling = timeouts.wait_timeout + timeouts.settle_delay + Duration::from_secs(2);
    let start = Instant::now();
    server.wait();
    assert!(
        start.elapsed() < ceiling,
        "wait exceeded drain ceiling: {:?}",
        start.elapsed()
    );
}

#[test]
fn test_start_is_refused_while_running() {
    let server = started_server();
    assert!(matches!(server.start(), Err(Error::AlreadyRunning)));
    server.stop().unwrap();
}

#[test]
fn test_init_is_refused_while_running() {
    let server = started_server();
    let err = server.init(TcpServerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    server.stop().unwrap();
}

#[test]
fn test_stop_is_refused_when_stopped() {
    let server = TcpServer::new();
    assert!(matches!(server.stop(), Err(Error::AlreadyStopped)));

    let server = started_server();
    server.stop().unwrap();
    assert!(matches!(server.stop(), Err(Error::AlreadyStopped)));
}

#[test]
fn test_start_without_config_is_rejected() {
    let server = TcpServer::new();
    assert!(matches!(server.start(), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_fresh_server_starts_after_previous_stopped() {
    let first = started_server();
    first.stop().unwrap();
    assert!(!first.running());

    let second = started_server();
    assert!(second.running());
    second.stop().unwrap();
}
