//! HTTP server scenarios: the echo round trip, duplicate path rejection,
//! header defaulting and case-insensitive header lookup.

mod common;

use common::{fast_timeouts, parse_http_response, sample_person, send_http_request, Person};
use http::{Method, StatusCode};
use netfabric::api::{ApiHandler, ApiServer, ApiServerConfig};
use netfabric::encoding::{self, Encoding};
use netfabric::Error;

fn echo_handler(path: &str) -> ApiHandler {
    ApiHandler::builder()
        .with_path(path)
        .on(Method::POST, |ctx| {
            let person: Person = ctx.parse_body()?;
            ctx.write_response(&person, StatusCode::OK)
        })
        .build()
        .unwrap()
}

fn started_server(handler: ApiHandler) -> ApiServer {
    let server = ApiServer::new();
    server
        .init(ApiServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeouts: fast_timeouts(),
            ..Default::default()
        })
        .unwrap();
    server.add_path(handler).unwrap();
    server.start().unwrap();
    server
}

#[test]
fn test_http_echo_round_trip() {
    let server = started_server(echo_handler("/"));
    let addr = server.local_addr().unwrap();

    let body = r#"{"id":"1","name":"Fabrizio","surname":"Torelli","age":45}"#;
    let raw = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nAccepts: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_http_request(addr, &raw);
    let (status, _head, response_body) = parse_http_response(&response);
    assert_eq!(status, 200);
    let echoed: Person = encoding::unmarshal(Encoding::Json, response_body.as_bytes()).unwrap();
    assert_eq!(echoed, sample_person());

    server.stop().unwrap();
}

#[test]
fn test_headers_default_to_json_both_ways() {
    let server = started_server(echo_handler("/"));
    let addr = server.local_addr().unwrap();

    let body = r#"{"id":"7","name":"Ada","surname":"Lovelace","age":36}"#;
    let raw = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_http_request(addr, &raw);
    let (status, head, response_body) = parse_http_response(&response);
    assert_eq!(status, 200);
    assert!(head.to_ascii_lowercase().contains("content-type: application/json"));
    let echoed: Person = encoding::unmarshal(Encoding::Json, response_body.as_bytes()).unwrap();
    assert_eq!(echoed.name, "Ada");

    server.stop().unwrap();
}

#[test]
fn test_header_lookup_is_case_insensitive() {
    let server = started_server(echo_handler("/"));
    let addr = server.local_addr().unwrap();

    let body = r#"{"id":"2","name":"Grace","surname":"Hopper","age":85}"#;
    let raw = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\ncontent-type: application/json\r\nACCEPTS: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_http_request(addr, &raw);
    let (status, _head, response_body) = parse_http_response(&response);
    assert_eq!(status, 200);
    let echoed: Person = encoding::unmarshal(Encoding::Json, response_body.as_bytes()).unwrap();
    assert_eq!(echoed.surname, "Hopper");

    server.stop().unwrap();
}

#[test]
fn test_unregistered_method_is_not_found() {
    let server = started_server(echo_handler("/"));
    let addr = server.local_addr().unwrap();

    let raw = "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    let response = send_http_request(addr, raw);
    let (status, _head, _body) = parse_http_response(&response);
    assert_eq!(status, 404);

    server.stop().unwrap();
}

#[test]
fn test_unknown_path_is_not_found() {
    let server = started_server(echo_handler("/"));
    let addr = server.local_addr().unwrap();

    let raw = "POST /missing HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    let response = send_http_request(addr, raw);
    let (status, _head, _body) = parse_http_response(&response);
    assert_eq!(status, 404);

    server.stop().unwrap();
}

#[test]
fn test_duplicate_path_is_rejected() {
    let server = ApiServer::new();
    server
        .init(ApiServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeouts: fast_timeouts(),
            ..Default::default()
        })
        .unwrap();
    server.add_path(echo_handler("/x")).unwrap();
    let err = server.add_path(echo_handler("/x")).unwrap_err();
    assert!(matches!(err, Error::Duplicate(path) if path == "/x"));

    // The first handler stays active.
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    let body = r#"{"id":"1","name":"A","surname":"B","age":1}"#;
    let raw = format!(
        "POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = send_http_request(addr, &raw);
    let (status, _head, _body) = parse_http_response(&response);
    assert_eq!(status, 200);
    server.stop().unwrap();
}

#[test]
fn test_handler_without_methods_is_rejected_at_build() {
    let err = ApiHandler::builder().with_path("/empty").build().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_handler_without_path_is_rejected_at_build() {
    let err = ApiHandler::builder()
        .on(Method::GET, |_ctx| Ok(()))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
