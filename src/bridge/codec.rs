//! Wire messages exchanged with the Bio-Formats bridge.
//!
//! A request is one JSON object followed by a single `\n`. A response is one
//! JSON object whose keys are flat, dot-namespaced names such as
//! `Bioformats.Pixels.SizeX`. Any response may carry an `error` key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

// ============================================================================
// Requests
// ============================================================================

/// A request to the bridge, tagged by its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BridgeRequest {
    Properties(PropertiesRequest),
    Convert(ConvertRequest),
}

/// `properties` action: image metadata of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesRequest {
    pub path: String,
    /// Also return the format's original (non-OME) key/value pairs.
    pub include_raw_properties: bool,
    pub legacy_mode: bool,
}

impl PropertiesRequest {
    pub fn new(path: impl Into<String>, include_raw_properties: bool) -> Self {
        Self {
            path: path.into(),
            include_raw_properties,
            legacy_mode: false,
        }
    }
}

/// `convert` action: decode a file and write it as (OME-)TIFF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub path: String,
    pub output: String,
    pub legacy_mode: bool,
    pub only_biggest_serie: bool,
    pub flatten: bool,
    pub compression: BridgeCompression,
    pub keep_original_metadata: bool,
    pub group: bool,
    pub n_pyramid_resolutions: u32,
    pub pyramid_scale_factor: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,
    #[serde(rename = "applyLUTs")]
    pub apply_luts: bool,
}

/// Compression names understood by the bridge's converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeCompression {
    Uncompressed,
    #[serde(rename = "LZW")]
    Lzw,
    #[serde(rename = "JPEG")]
    Jpeg,
    #[serde(rename = "JPEG-2000")]
    Jpeg2000,
    #[serde(rename = "zlib")]
    Zlib,
}

// ============================================================================
// Responses
// ============================================================================

/// A decoded bridge response: a JSON object of dotted keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeResponse(Map<String, Value>);

impl BridgeResponse {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Payload of the `error` key, if the bridge reported one.
    pub fn error(&self) -> Option<&Value> {
        self.0.get("error")
    }

    /// Path of the written file in a `convert` response.
    pub fn file(&self) -> Option<&str> {
        self.0.get("file").and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for BridgeResponse {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Serialize a request as one newline-terminated JSON line.
pub fn encode(request: &BridgeRequest) -> Result<Vec<u8>, BridgeError> {
    let mut bytes =
        serde_json::to_vec(request).map_err(|e| BridgeError::Encode(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse a complete response.
///
/// Anything other than a single JSON object is rejected.
pub fn decode(bytes: &[u8]) -> Result<BridgeResponse, BridgeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::MalformedResponse(e.to_string()))?;
    match value {
        Value::Object(fields) => Ok(BridgeResponse(fields)),
        other => Err(BridgeError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Whether the response carries a top-level `error` key.
pub fn has_error(response: &BridgeResponse) -> bool {
    response.contains_key("error")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_convert() -> ConvertRequest {
        ConvertRequest {
            path: "/data/slide.czi".to_string(),
            output: "/data/.slide.intermediate.tif".to_string(),
            legacy_mode: false,
            only_biggest_serie: true,
            flatten: true,
            compression: BridgeCompression::Lzw,
            keep_original_metadata: false,
            group: true,
            n_pyramid_resolutions: 1,
            pyramid_scale_factor: 1,
            tile_size: Some(256),
            apply_luts: false,
        }
    }

    #[test]
    fn test_properties_wire_format() {
        let bytes = encode(&BridgeRequest::Properties(PropertiesRequest::new(
            "/data/a.lif",
            false,
        )))
        .unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "properties",
                "includeRawProperties": false,
                "legacyMode": false,
                "path": "/data/a.lif"
            })
        );
    }

    #[test]
    fn test_convert_wire_format() {
        let bytes = encode(&BridgeRequest::Convert(sample_convert())).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "convert",
                "legacyMode": false,
                "path": "/data/slide.czi",
                "output": "/data/.slide.intermediate.tif",
                "onlyBiggestSerie": true,
                "flatten": true,
                "compression": "LZW",
                "keepOriginalMetadata": false,
                "group": true,
                "nPyramidResolutions": 1,
                "pyramidScaleFactor": 1,
                "tileSize": 256,
                "applyLUTs": false
            })
        );
    }

    #[test]
    fn test_convert_request_round_trip() {
        let request = BridgeRequest::Convert(ConvertRequest {
            tile_size: None,
            compression: BridgeCompression::Jpeg2000,
            ..sample_convert()
        });
        let bytes = encode(&request).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("tileSize"));
        assert!(String::from_utf8_lossy(&bytes).contains("\"JPEG-2000\""));

        let decoded: BridgeRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_compression_names() {
        let names: Vec<String> = [
            BridgeCompression::Uncompressed,
            BridgeCompression::Lzw,
            BridgeCompression::Jpeg,
            BridgeCompression::Jpeg2000,
            BridgeCompression::Zlib,
        ]
        .iter()
        .map(|c| serde_json::to_string(c).unwrap())
        .collect();
        assert_eq!(
            names,
            vec!["\"Uncompressed\"", "\"LZW\"", "\"JPEG\"", "\"JPEG-2000\"", "\"zlib\""]
        );
    }

    #[test]
    fn test_decode_object() {
        let response = decode(br#"{"Bioformats.Pixels.SizeX": 672, "file": "/tmp/out.tif"}"#).unwrap();
        assert_eq!(response.len(), 2);
        assert_eq!(response.get("Bioformats.Pixels.SizeX"), Some(&json!(672)));
        assert_eq!(response.file(), Some("/tmp/out.tif"));
        assert!(!has_error(&response));
    }

    #[test]
    fn test_decode_error_key() {
        let response = decode(br#"{"error": "Unknown format"}"#).unwrap();
        assert!(has_error(&response));
        assert_eq!(response.error(), Some(&json!("Unknown format")));
        assert_eq!(response.file(), None);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        for bad in [&b"[1, 2]"[..], b"42", b"\"text\"", b"null"] {
            assert!(matches!(decode(bad), Err(BridgeError::MalformedResponse(_))));
        }
    }

    #[test]
    fn test_decode_rejects_partial_json() {
        assert!(matches!(
            decode(br#"{"Bioformats.Pixels.SizeX": 67"#),
            Err(BridgeError::MalformedResponse(_))
        ));
        assert!(matches!(decode(b""), Err(BridgeError::MalformedResponse(_))));
        assert!(matches!(
            decode(&[0xFF, 0xFE, 0x7B]),
            Err(BridgeError::MalformedResponse(_))
        ));
    }
}
