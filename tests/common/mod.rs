#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use netfabric::runtime::Timeouts;

/// Sample payload used across the echo scenarios.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub age: u32,
}

pub fn sample_person() -> Person {
    Person {
        id: "1".to_string(),
        name: "Fabrizio".to_string(),
        surname: "Torelli".to_string(),
        age: 45,
    }
}

/// Timeouts scaled down so lifecycle tests finish in seconds.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        exit_check_interval: Duration::from_millis(100),
        wait_timeout: Duration::from_secs(2),
        settle_delay: Duration::from_millis(200),
        client_reset: Duration::from_millis(50),
        turn_reset: Duration::from_millis(300),
    }
}

/// Sends one raw HTTP/1.1 request and returns the full response text.
pub fn send_http_request(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(raw.as_bytes()).expect("write request");
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    response
}

/// Splits a raw HTTP response into (status code, headers, body).
pub fn parse_http_response(raw: &str) -> (u16, String, String) {
    let mut parts = raw.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("").to_string();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    (status, head.to_string(), body)
}

/// Reads from the socket until it stays idle for `idle`.
pub fn read_until_idle(stream: &mut TcpStream, idle: Duration) -> Vec<u8> {
    stream.set_read_timeout(Some(idle)).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}
