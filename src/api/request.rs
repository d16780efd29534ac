use std::collections::HashMap;
use std::io::{self, Read};

use http::Method;

use crate::error::Error;
use crate::runtime::Lifecycle;
use crate::stream::NetStream;

/// Parsed HTTP request data handed to the dispatch path.
#[derive(Debug)]
pub(crate) struct ParsedRequest {
    pub method: Method,
    pub path: String,
    /// Header names are lowercased at parse time.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

struct ParsedHead {
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    keep_alive: bool,
    header_len: usize,
    content_length: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<ParsedHead>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let header_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed http request: {err}"),
            )))
        }
    };
    let method: Method = req
        .method
        .unwrap_or("GET")
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::InvalidData, "bad method")))?;
    let raw_path = req.path.unwrap_or("/");
    let path = raw_path.split('?').next().unwrap_or("/").to_string();
    let mut header_map = HashMap::new();
    for header in req.headers.iter() {
        header_map.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).to_string(),
        );
    }
    let content_length = header_map
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let keep_alive = match header_map.get("connection").map(String::as_str) {
        Some(value) if value.eq_ignore_ascii_case("close") => false,
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
        _ => req.version == Some(1),
    };
    Ok(Some(ParsedHead {
        method,
        path,
        headers: header_map,
        keep_alive,
        header_len,
        content_length,
    }))
}

/// Reads one request from the connection.
///
/// Returns `Ok(None)` on a clean end of stream, and also when the server
/// stopped while the connection sat idle between requests.
pub(crate) fn read_request(
    conn: &mut dyn NetStream,
    lifecycle: &Lifecycle,
) -> Result<Option<ParsedRequest>, Error> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if !buf.is_empty() {
            if let Some(head) = parse_head(&buf)? {
                let mut body = buf[head.header_len..].to_vec();
                while body.len() < head.content_length {
                    match conn.read(&mut tmp) {
                        Ok(0) => break,
                        Ok(n) => body.extend_from_slice(&tmp[..n]),
                        Err(err)
                            if err.kind() == io::ErrorKind::WouldBlock
                                || err.kind() == io::ErrorKind::TimedOut =>
                        {
                            if !lifecycle.running() {
                                break;
                            }
                        }
                        Err(err) => return Err(Error::Io(err)),
                    }
                }
                body.truncate(head.content_length);
                return Ok(Some(ParsedRequest {
                    method: head.method,
                    path: head.path,
                    headers: head.headers,
                    body,
                    keep_alive: head.keep_alive,
                }));
            }
        }
        match conn.read(&mut tmp) {
            Ok(0) => return Ok(None),
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                if buf.is_empty() && !lifecycle.running() {
                    return Ok(None);
                }
            }
            Err(err) => return Err(Error::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head_complete() {
        let raw = b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        let head = parse_head(raw).unwrap().expect("complete request");
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.path, "/echo");
        assert_eq!(
            head.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(head.content_length, 2);
        assert!(head.keep_alive);
    }

    #[test]
    fn test_parse_head_partial() {
        let raw = b"POST /echo HTTP/1.1\r\nContent-";
        assert!(parse_head(raw).unwrap().is_none());
    }

    #[test]
    fn test_query_string_stripped() {
        let raw = b"GET /items?page=2 HTTP/1.1\r\n\r\n";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.path, "/items");
    }

    #[test]
    fn test_connection_close() {
        let raw = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let head = parse_head(raw).unwrap().unwrap();
        assert!(!head.keep_alive);
    }
}
