use std::io::{self, Write};

use http::StatusCode;

use crate::context::ResponseParts;
use crate::stream::NetStream;

fn status_reason(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// Writes the buffered response parts to the wire.
pub(crate) fn write_response(
    conn: &mut dyn NetStream,
    parts: &ResponseParts,
    keep_alive: bool,
) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n",
        parts.status.as_u16(),
        status_reason(parts.status),
        parts.body.len()
    );
    if let Some(content_type) = &parts.content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str(if keep_alive {
        "Connection: keep-alive\r\n\r\n"
    } else {
        "Connection: close\r\n\r\n"
    });
    conn.write_all(head.as_bytes())?;
    conn.write_all(&parts.body)?;
    conn.flush()
}

/// Writes a JSON error body with the given status.
pub(crate) fn write_json_error(
    conn: &mut dyn NetStream,
    status: StatusCode,
    message: &str,
    keep_alive: bool,
) -> io::Result<()> {
    let parts = ResponseParts {
        status,
        content_type: Some("application/json".to_string()),
        body: serde_json::json!({ "error": message }).to_string().into_bytes(),
        written: true,
    };
    write_response(conn, &parts, keep_alive)
}
