//! Stream buffer behavior over live loopback connections: first-byte
//! signalling, echo writes, and the turn boundary between serial requests.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use netfabric::stream::{SharedConn, StreamBuffer};

fn loopback_pair() -> (SharedConn, std::net::TcpStream) {
    let listener = may::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).unwrap();
    let (server_side, _) = listener.accept().unwrap();
    (SharedConn::new(Box::new(server_side)), client)
}

fn drain(buffer: &mut StreamBuffer) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = buffer.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    out
}

#[test]
fn test_enroll_signals_first_bytes() {
    let (conn, mut client) = loopback_pair();
    let mut buffer = StreamBuffer::new(Duration::from_millis(300));
    buffer.enroll(conn);
    assert!(buffer.is_open());
    assert!(!buffer.is_reading());

    client.write_all(b"hello stream").unwrap();
    buffer.wait();
    assert!(buffer.is_reading());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(drain(&mut buffer), b"hello stream");
    buffer.close();
    assert!(!buffer.is_open());
}

#[test]
fn test_turn_boundary_discards_stale_bytes() {
    let (conn, mut client) = loopback_pair();
    let mut buffer = StreamBuffer::new(Duration::from_millis(200));
    buffer.enroll(conn);

    // First request arrives but nobody drains it.
    client.write_all(b"first request").unwrap();
    buffer.wait();
    // Give the reader one quantum plus the turn reset to clear the queue.
    thread::sleep(Duration::from_millis(600));

    // The second request must be observed alone.
    client.write_all(b"second request").unwrap();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(drain(&mut buffer), b"second request");
    buffer.close();
}

#[test]
fn test_end_turn_clears_queue() {
    let (conn, mut client) = loopback_pair();
    let mut buffer = StreamBuffer::new(Duration::from_secs(5));
    buffer.enroll(conn);

    client.write_all(b"stale").unwrap();
    buffer.wait();
    thread::sleep(Duration::from_millis(100));
    buffer.end_turn();
    assert_eq!(drain(&mut buffer), b"");
    buffer.close();
}

#[test]
fn test_handler_echo_through_buffer() {
    let mut buffer = StreamBuffer::new(Duration::from_millis(300));
    buffer.write_all(b"echoed").unwrap();
    assert_eq!(drain(&mut buffer), b"echoed");
}

#[test]
fn test_close_resets_queue() {
    let (conn, mut client) = loopback_pair();
    let mut buffer = StreamBuffer::new(Duration::from_secs(5));
    buffer.enroll(conn);
    client.write_all(b"pending bytes").unwrap();
    buffer.wait();
    thread::sleep(Duration::from_millis(100));
    buffer.close();
    assert_eq!(drain(&mut buffer), b"");
    assert!(!buffer.is_reading());
}
