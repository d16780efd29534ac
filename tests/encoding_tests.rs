//! Round-trip and negative tests for the encoding registry.

mod common;

use common::{sample_person, Person};
use netfabric::encoding::{
    self, decode_base64, encode_base64, marshal, marshal_to_file, unmarshal, unmarshal_from_file,
    Encoding, DEFAULT_FILE_PERM,
};
use netfabric::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Sample {
    #[serde(default)]
    name: String,
    #[serde(default)]
    surname: String,
    #[serde(default)]
    age: u32,
}

fn sample() -> Sample {
    Sample {
        name: "Fabrizio".to_string(),
        surname: "Torelli".to_string(),
        age: 45,
    }
}

#[test]
fn test_marshal_json() {
    let bytes = marshal(Encoding::Json, &sample()).unwrap();
    assert_eq!(
        bytes,
        br#"{"name":"Fabrizio","surname":"Torelli","age":45}"#
    );
}

#[test]
fn test_unmarshal_json() {
    let decoded: Sample =
        unmarshal(Encoding::Json, br#"{"name":"Fabrizio","surname":"Torelli","age":45}"#).unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn test_round_trip_yaml() {
    let bytes = marshal(Encoding::Yaml, &sample()).unwrap();
    let decoded: Sample = unmarshal(Encoding::Yaml, &bytes).unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn test_round_trip_xml() {
    let bytes = marshal(Encoding::Xml, &sample()).unwrap();
    let decoded: Sample = unmarshal(Encoding::Xml, &bytes).unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn test_round_trip_person_all_encodings() {
    for enc in [Encoding::Json, Encoding::Yaml, Encoding::Xml] {
        let bytes = marshal(enc, &sample_person()).unwrap();
        let decoded: Person = unmarshal(enc, &bytes).unwrap();
        assert_eq!(decoded, sample_person(), "round trip through {enc}");
    }
}

#[test]
fn test_unmarshal_garbage_is_codec_error() {
    let err = unmarshal::<Sample>(Encoding::Json, b"{not json").unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
}

#[test]
fn test_mime_type_negative() {
    assert_eq!(Encoding::from_mime("application/zip"), None);
    assert_eq!(Encoding::from_mime("application/octet-stream"), None);
    assert_eq!(
        Encoding::from_mime(encoding::JSON_MIME),
        Some(Encoding::Json)
    );
}

#[test]
fn test_base64_round_trip() {
    let plain = b"This is a test";
    let encoded = encode_base64(plain);
    assert_eq!(encoded, b"VGhpcyBpcyBhIHRlc3Q=");
    let decoded = decode_base64(&encoded).unwrap();
    assert_eq!(decoded, plain);
}

#[test]
fn test_base64_decode_garbage() {
    let err = decode_base64(b"!!! not base64 !!!").unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
}

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.yaml");
    marshal_to_file(&path, DEFAULT_FILE_PERM, Encoding::Yaml, &sample()).unwrap();
    let decoded: Sample = unmarshal_from_file(&path, Encoding::Yaml).unwrap();
    assert_eq!(decoded, sample());
}

#[test]
fn test_unmarshal_missing_file() {
    let err = unmarshal_from_file::<Sample>("/nonexistent/sample.json", Encoding::Json).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
