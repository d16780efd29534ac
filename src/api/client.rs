use std::fs;
use std::io;

use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ApiClientConfig;
use crate::encoding::{self, Encoding};
use crate::error::Error;

/// Blocking HTTP client for API servers.
///
/// `connect` validates the endpoint and builds the underlying client; the
/// call methods attach `Content-Type` / `Accepts` headers and run the
/// encoding negotiation the server side expects.
#[derive(Default)]
pub struct ApiClient {
    config: Option<ApiClientConfig>,
    cli: Option<reqwest::blocking::Client>,
    base_url: String,
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::Io(io::Error::other(err))
}

impl ApiClient {
    pub fn new() -> ApiClient {
        ApiClient::default()
    }

    /// Validates the endpoint and prepares the connection.
    pub fn connect(&mut self, config: ApiClientConfig) -> Result<(), Error> {
        if config.protocol.is_empty() || config.host.is_empty() || config.port == 0 {
            return Err(Error::InvalidConfig(
                "invalid protocol, server and/or port values".to_string(),
            ));
        }
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if config.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_path) = &config.root_ca_path {
            let pem = fs::read(ca_path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(transport_error)?;
            builder = builder.add_root_certificate(cert);
        }
        let cli = builder.build().map_err(transport_error)?;
        self.base_url = format!("{}://{}:{}", config.protocol, config.host, config.port);
        debug!(base_url = %self.base_url, "created default base url");
        self.config = Some(config);
        self.cli = Some(cli);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.cli.is_some()
    }

    /// Issues a request with a raw body, attaching the codec headers when
    /// given, and returns the raw response.
    pub fn call(
        &self,
        path: &str,
        method: Method,
        content_type: Option<&str>,
        accepts: Option<&str>,
        body: Vec<u8>,
    ) -> Result<reqwest::blocking::Response, Error> {
        let cli = self.cli.as_ref().ok_or(Error::NotConnected)?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, method = %method, "creating request");
        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| Error::InvalidConfig(format!("invalid method: {e}")))?;
        let mut request = cli.request(method, &url).body(body);
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }
        if let Some(accepts) = accepts {
            request = request.header("Accepts", accepts);
        }
        request.send().map_err(transport_error)
    }

    /// Marshals `request` with the codec inferred from `content_type`,
    /// issues the call, and decodes the response with the codec inferred
    /// from `accepts` when both are present.
    pub fn encode<Req, Resp>(
        &self,
        path: &str,
        method: Method,
        content_type: &str,
        accepts: Option<&str>,
        request: &Req,
    ) -> Result<Option<Resp>, Error>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.cli.is_none() {
            return Err(Error::NotConnected);
        }
        let request_encoding = Encoding::from_mime(content_type)
            .ok_or_else(|| Error::UnknownEncoding(content_type.to_string()))?;
        let body = encoding::marshal(request_encoding, request)?;
        let response = self.call(path, method, Some(content_type), accepts, body)?;
        match accepts {
            Some(accepts) => {
                let response_encoding = Encoding::from_mime(accepts)
                    .ok_or_else(|| Error::UnknownEncoding(accepts.to_string()))?;
                let data = response.bytes().map_err(transport_error)?;
                Ok(Some(encoding::unmarshal(response_encoding, &data)?))
            }
            None => Ok(None),
        }
    }
}
