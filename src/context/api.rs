use std::collections::HashMap;
use std::net::SocketAddr;

use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::{Cache, SharedCache};
use crate::encoding::{self, Encoding, JSON_MIME};
use crate::error::Error;

/// Buffered response parts, flushed to the wire by the server worker after
/// the action returns.
#[derive(Debug)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub written: bool,
}

impl Default for ResponseParts {
    fn default() -> Self {
        ResponseParts {
            status: StatusCode::OK,
            content_type: None,
            body: Vec::new(),
            written: false,
        }
    }
}

/// Call context for one HTTP request.
///
/// Header keys are stored lowercased, so lookup is case-insensitive. Both
/// negotiated MIME types default to `application/json` when the request
/// carries no `Content-Type` / `Accepts` header.
pub struct ApiContext {
    /// Fresh UUIDv4, generated at construction.
    pub id: Uuid,
    pub path: String,
    pub method: Method,
    pub remote_addr: Option<SocketAddr>,
    pub content_mime: String,
    pub accept_mime: String,
    /// Cache dropped at the end of this request.
    pub request_cache: Cache,
    /// Cache shared by every request of the owning handler.
    pub handler_cache: SharedCache,
    /// Cache shared across the whole server.
    pub server_cache: SharedCache,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    pub(crate) response: ResponseParts,
}

impl ApiContext {
    pub(crate) fn new(
        path: String,
        method: Method,
        remote_addr: Option<SocketAddr>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        handler_cache: SharedCache,
        server_cache: SharedCache,
    ) -> ApiContext {
        let content_mime = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| JSON_MIME.to_string());
        let accept_mime = headers
            .get("accepts")
            .cloned()
            .unwrap_or_else(|| JSON_MIME.to_string());
        ApiContext {
            id: Uuid::new_v4(),
            path,
            method,
            remote_addr,
            content_mime,
            accept_mime,
            request_cache: Cache::new(),
            handler_cache,
            server_cache,
            headers,
            body,
            response: ResponseParts::default(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The raw request body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Codec selected by the request `Content-Type`.
    pub fn request_encoding(&self) -> Option<Encoding> {
        Encoding::from_mime(&self.content_mime)
    }

    /// Codec selected by the request `Accepts`.
    pub fn response_encoding(&self) -> Option<Encoding> {
        Encoding::from_mime(&self.accept_mime)
    }

    /// Only POST requests carry a parseable body.
    pub fn can_parse_body(&self) -> bool {
        self.method == Method::POST
    }

    /// Decodes the request body with the content-negotiated codec.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if !self.can_parse_body() {
            return Err(Error::InvalidMethod(self.method.to_string()));
        }
        let enc = self
            .request_encoding()
            .ok_or_else(|| Error::UnknownEncoding(self.content_mime.clone()))?;
        encoding::unmarshal(enc, &self.body)
    }

    /// Encodes `value` with the accept-negotiated codec and buffers it as
    /// the response with the given status code.
    pub fn write_response<T: Serialize>(
        &mut self,
        value: &T,
        status: StatusCode,
    ) -> Result<(), Error> {
        let enc = self
            .response_encoding()
            .ok_or_else(|| Error::UnknownEncoding(self.accept_mime.clone()))?;
        let data = encoding::marshal(enc, value)?;
        self.response.status = status;
        self.response.content_type = Some(self.accept_mime.clone());
        self.response.body = data;
        self.response.written = true;
        Ok(())
    }

    pub(crate) fn into_response(self) -> ResponseParts {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: u32,
    }

    fn context(method: Method, headers: HashMap<String, String>, body: &[u8]) -> ApiContext {
        ApiContext::new(
            "/".to_string(),
            method,
            None,
            headers,
            body.to_vec(),
            Cache::shared(),
            Cache::shared(),
        )
    }

    #[test]
    fn test_headers_default_to_json() {
        let ctx = context(Method::POST, HashMap::new(), b"{}");
        assert_eq!(ctx.content_mime, JSON_MIME);
        assert_eq!(ctx.accept_mime, JSON_MIME);
        assert_eq!(ctx.request_encoding(), Some(Encoding::Json));
    }

    #[test]
    fn test_parse_body_requires_post() {
        let ctx = context(Method::GET, HashMap::new(), b"{}");
        assert!(!ctx.can_parse_body());
        let err = ctx.parse_body::<Person>().unwrap_err();
        assert!(matches!(err, Error::InvalidMethod(_)));
    }

    #[test]
    fn test_parse_body_unknown_mime() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/zip".to_string());
        let ctx = context(Method::POST, headers, b"{}");
        let err = ctx.parse_body::<Person>().unwrap_err();
        assert!(matches!(err, Error::UnknownEncoding(_)));
    }

    #[test]
    fn test_write_response_unknown_accepts() {
        let mut headers = HashMap::new();
        headers.insert("accepts".to_string(), "application/zip".to_string());
        let mut ctx = context(Method::POST, headers, b"{}");
        let value = Person {
            name: "Fabrizio".to_string(),
            age: 45,
        };
        let err = ctx.write_response(&value, StatusCode::OK).unwrap_err();
        assert!(matches!(err, Error::UnknownEncoding(_)));
    }

    #[test]
    fn test_round_trip_through_context() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), JSON_MIME.to_string());
        let body = br#"{"name":"Fabrizio","age":45}"#;
        let mut ctx = context(Method::POST, headers, body);
        let person: Person = ctx.parse_body().unwrap();
        assert_eq!(person.age, 45);
        ctx.write_response(&person, StatusCode::OK).unwrap();
        let parts = ctx.into_response();
        assert!(parts.written);
        assert_eq!(parts.status, StatusCode::OK);
        assert_eq!(parts.content_type.as_deref(), Some(JSON_MIME));
    }
}
