//! Structured payload encoding shared by every surface of the crate.
//!
//! Maps MIME types to codec tags and round-trips values through JSON, YAML
//! or XML. Codec panics are trapped and surfaced as [`Error::Codec`] so a
//! malformed payload can never take the host process down.

use std::any::Any;
use std::fmt;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// MIME type for JSON payloads.
pub const JSON_MIME: &str = "application/json";
/// MIME type for YAML payloads.
pub const YAML_MIME: &str = "text/yaml";
/// MIME type for XML payloads.
pub const XML_MIME: &str = "application/xml";
/// Plain text; carries no codec.
pub const PLAIN_TEXT_MIME: &str = "text/plain";
/// Zip archives; carries no codec.
pub const ZIP_ARCHIVE_MIME: &str = "application/zip";
/// Opaque binary; carries no codec.
pub const BINARY_STREAM_MIME: &str = "application/octet-stream";

/// Default permission bits for files written by [`marshal_to_file`].
pub const DEFAULT_FILE_PERM: u32 = 0o664;

/// Wire encoding negotiated for a request or response.
///
/// Unknown encodings are represented as `None` at parse boundaries and
/// become [`Error::UnknownEncoding`] when a codec is actually required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Json,
    Yaml,
    Xml,
}

impl Encoding {
    /// Parses an encoding name, matched case-insensitively.
    pub fn parse(s: &str) -> Option<Encoding> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Encoding::Json),
            "yaml" => Some(Encoding::Yaml),
            "xml" => Some(Encoding::Xml),
            _ => None,
        }
    }

    /// Maps a MIME type to its codec. Parameters (`; charset=...`) are ignored.
    pub fn from_mime(mime: &str) -> Option<Encoding> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            JSON_MIME => Some(Encoding::Json),
            YAML_MIME => Some(Encoding::Yaml),
            XML_MIME => Some(Encoding::Xml),
            _ => None,
        }
    }

    /// The canonical MIME type for this encoding.
    pub fn mime(&self) -> &'static str {
        match self {
            Encoding::Json => JSON_MIME,
            Encoding::Yaml => YAML_MIME,
            Encoding::Xml => XML_MIME,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Yaml => "yaml",
            Encoding::Xml => "xml",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "codec panicked".to_string()
    }
}

/// Serializes `value` with the given encoding.
pub fn marshal<T: Serialize>(enc: Encoding, value: &T) -> Result<Vec<u8>, Error> {
    let result = catch_unwind(AssertUnwindSafe(|| match enc {
        Encoding::Json => serde_json::to_vec(value).map_err(|e| Error::Codec(e.to_string())),
        Encoding::Yaml => serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::Codec(e.to_string())),
        Encoding::Xml => quick_xml::se::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::Codec(e.to_string())),
    }));
    match result {
        Ok(bytes) => bytes,
        Err(payload) => Err(Error::Codec(panic_text(payload))),
    }
}

/// Deserializes a value of type `T` from `data` with the given encoding.
pub fn unmarshal<T: DeserializeOwned>(enc: Encoding, data: &[u8]) -> Result<T, Error> {
    let result = catch_unwind(AssertUnwindSafe(|| match enc {
        Encoding::Json => serde_json::from_slice(data).map_err(|e| Error::Codec(e.to_string())),
        Encoding::Yaml => serde_yaml::from_slice(data).map_err(|e| Error::Codec(e.to_string())),
        Encoding::Xml => {
            let text = std::str::from_utf8(data).map_err(|e| Error::Codec(e.to_string()))?;
            quick_xml::de::from_str(text).map_err(|e| Error::Codec(e.to_string()))
        }
    }));
    match result {
        Ok(value) => value,
        Err(payload) => Err(Error::Codec(panic_text(payload))),
    }
}

/// Serializes `value` and writes it to `path` with the given permission bits.
pub fn marshal_to_file<T: Serialize>(
    path: impl AsRef<Path>,
    perm: u32,
    enc: Encoding,
    value: &T,
) -> Result<(), Error> {
    let data = marshal(enc, value)?;
    fs::write(path.as_ref(), data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path.as_ref(), fs::Permissions::from_mode(perm))?;
    }
    #[cfg(not(unix))]
    let _ = perm;
    Ok(())
}

/// Reads `path` and deserializes its contents with the given encoding.
pub fn unmarshal_from_file<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    enc: Encoding,
) -> Result<T, Error> {
    let data = fs::read(path.as_ref())?;
    unmarshal(enc, &data)
}

/// Standard base64 encoding of `data`.
pub fn encode_base64(data: &[u8]) -> Vec<u8> {
    BASE64_STANDARD.encode(data).into_bytes()
}

/// Standard base64 decoding of `data`.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>, Error> {
    BASE64_STANDARD
        .decode(data)
        .map_err(|e| Error::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoding_case_insensitive() {
        assert_eq!(Encoding::parse("json"), Some(Encoding::Json));
        assert_eq!(Encoding::parse("JSON"), Some(Encoding::Json));
        assert_eq!(Encoding::parse("Yaml"), Some(Encoding::Yaml));
        assert_eq!(Encoding::parse("XML"), Some(Encoding::Xml));
        assert_eq!(Encoding::parse("msgpack"), None);
    }

    #[test]
    fn test_mime_mapping_is_partial() {
        assert_eq!(Encoding::from_mime(JSON_MIME), Some(Encoding::Json));
        assert_eq!(Encoding::from_mime(YAML_MIME), Some(Encoding::Yaml));
        assert_eq!(Encoding::from_mime(XML_MIME), Some(Encoding::Xml));
        assert_eq!(Encoding::from_mime(ZIP_ARCHIVE_MIME), None);
        assert_eq!(Encoding::from_mime(PLAIN_TEXT_MIME), None);
        assert_eq!(Encoding::from_mime(BINARY_STREAM_MIME), None);
    }

    #[test]
    fn test_mime_parameters_ignored() {
        assert_eq!(
            Encoding::from_mime("application/json; charset=utf-8"),
            Some(Encoding::Json)
        );
    }
}
