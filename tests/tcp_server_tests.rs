//! TCP server scenarios: the encode/decode echo round trip, duplicate
//! handler rejection and empty-handler rejection.

mod common;

use std::io::Write;
use std::thread;
use std::time::Duration;

use common::{fast_timeouts, read_until_idle, sample_person, Person};
use netfabric::encoding::{self, Encoding};
use netfabric::tcp::{TcpClient, TcpClientConfig, TcpHandler, TcpServer, TcpServerConfig};
use netfabric::Error;

fn sample_data_handler() -> TcpHandler {
    TcpHandler::builder()
        .with_name("Main")
        .with_action("read-sample-data", |ctx| {
            let _request: Person = ctx.parse_request()?;
            ctx.write_response(&sample_person())
        })
        .build()
        .unwrap()
}

fn started_server(handler: TcpHandler) -> TcpServer {
    let server = TcpServer::new();
    server
        .init(TcpServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            encoding: Encoding::Json,
            timeouts: fast_timeouts(),
            ..Default::default()
        })
        .unwrap();
    server.add_path(handler).unwrap();
    server.start().unwrap();
    server
}

#[test]
fn test_tcp_echo_round_trip_raw_socket() {
    let server = started_server(sample_data_handler());
    let addr = server.local_addr().unwrap();

    let mut stream = std::net::TcpStream::connect(addr).unwrap();
    let request = encoding::marshal(Encoding::Json, &sample_person()).unwrap();
    stream.write_all(&request).unwrap();

    // The server answers once the request turn goes quiet.
    let response = read_until_idle(&mut stream, Duration::from_secs(3));
    let decoded: Person = encoding::unmarshal(Encoding::Json, &response).unwrap();
    assert_eq!(decoded, sample_person());

    server.stop().unwrap();
}

#[test]
fn test_tcp_echo_round_trip_client() {
    let server = started_server(sample_data_handler());
    let addr = server.local_addr().unwrap();

    let mut client = TcpClient::new();
    client
        .connect(TcpClientConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            encoding: Encoding::Json,
            ..Default::default()
        })
        .unwrap();
    client.encode(&sample_person(), Duration::ZERO).unwrap();
    let response: Person = client.read_remote(Duration::from_secs(10)).unwrap();
    assert_eq!(response, sample_person());
    client.close().unwrap();

    server.stop().unwrap();
}

#[test]
fn test_two_serial_connections_see_distinct_bodies() {
    let server = started_server(
        TcpHandler::builder()
            .with_name("Echo")
            .with_action("echo-request", |ctx| {
                let request: Person = ctx.parse_request()?;
                ctx.write_response(&request)
            })
            .build()
            .unwrap(),
    );
    let addr = server.local_addr().unwrap();

    for name in ["first", "second"] {
        let person = Person {
            id: name.to_string(),
            name: name.to_string(),
            surname: String::new(),
            age: 1,
        };
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        let request = encoding::marshal(Encoding::Json, &person).unwrap();
        stream.write_all(&request).unwrap();
        let response = read_until_idle(&mut stream, Duration::from_secs(3));
        let decoded: Person = encoding::unmarshal(Encoding::Json, &response).unwrap();
        assert_eq!(decoded.id, name, "response leaked a previous body");
        drop(stream);
        thread::sleep(Duration::from_millis(100));
    }

    server.stop().unwrap();
}

#[test]
fn test_duplicate_handler_name_is_rejected() {
    let server = TcpServer::new();
    server
        .init(TcpServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeouts: fast_timeouts(),
            ..Default::default()
        })
        .unwrap();
    server.add_path(sample_data_handler()).unwrap();
    let err = server.add_path(sample_data_handler()).unwrap_err();
    assert!(matches!(err, Error::Duplicate(name) if name == "Main"));
}

#[test]
fn test_handler_without_actions_is_rejected_at_build() {
    let err = TcpHandler::builder().with_name("Empty").build().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_handler_without_name_is_rejected_at_build() {
    let err = TcpHandler::builder()
        .with_action("noop", |_ctx| Ok(()))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_client_requires_connect() {
    let mut client = TcpClient::new();
    let err = client.encode(&sample_person(), Duration::ZERO).unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    let err = client.read_remote::<Person>(Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert!(!client.is_open());
    assert!(matches!(client.close(), Err(Error::NotConnected)));
}

#[test]
fn test_client_rejects_invalid_config() {
    let mut client = TcpClient::new();
    let err = client
        .connect(TcpClientConfig {
            host: String::new(),
            port: 0,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
