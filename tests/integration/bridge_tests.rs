//! Bridge client integration tests.
//!
//! Tests verify:
//! - Requests arrive as one JSON line with the expected fields
//! - Responses are framed correctly over a real socket
//! - Bridge-reported errors, timeouts and refused connections are told apart

use serde_json::json;
use std::net::TcpListener;
use std::path::Path;
use std::time::{Duration, Instant};

use bioformats_bridge::{BridgeClient, BridgeConfig, BridgeError, ConvertOptions};

use super::test_utils::{properties_body, MockBridge, Reply};

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_properties_request_and_response() {
    let bridge = MockBridge::start(|_| Reply::Json(properties_body(1024, 768, 1)));
    let client = BridgeClient::from_config(&bridge.config());

    let response = client
        .query_properties(Path::new("/data/slide.czi"), false)
        .unwrap();
    assert_eq!(response.get("Bioformats.Pixels.SizeX"), Some(&json!(1024)));
    assert!(response.error().is_none());

    let requests = bridge.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0],
        json!({
            "action": "properties",
            "path": "/data/slide.czi",
            "includeRawProperties": false,
            "legacyMode": false
        })
    );
}

#[test]
fn test_bridge_error_is_operation_error() {
    let bridge = MockBridge::start(|_| Reply::Json(json!({"error": "Unknown file format"})));
    let client = BridgeClient::from_config(&bridge.config());

    let err = client
        .query_properties(Path::new("/data/broken.czi"), true)
        .unwrap_err();
    match err {
        BridgeError::Operation { error } => assert_eq!(error, json!("Unknown file format")),
        other => panic!("expected an operation error, got {other:?}"),
    }
    assert_eq!(bridge.requests()[0]["includeRawProperties"], true);
}

// =============================================================================
// Convert
// =============================================================================

#[test]
fn test_convert_request_fields() {
    let bridge = MockBridge::start(|request| {
        Reply::Json(json!({"file": request["output"].clone()}))
    });
    let client = BridgeClient::from_config(&bridge.config());

    let options = ConvertOptions {
        tile_size: Some(512),
        ..ConvertOptions::default()
    };
    let response = client
        .convert(Path::new("/data/a.lif"), Path::new("/tmp/a.tif"), &options)
        .unwrap();
    assert_eq!(response.file(), Some("/tmp/a.tif"));

    let request = &bridge.requests()[0];
    assert_eq!(request["action"], "convert");
    assert_eq!(request["path"], "/data/a.lif");
    assert_eq!(request["output"], "/tmp/a.tif");
    assert_eq!(request["flatten"], true);
    assert_eq!(request["compression"], "LZW");
    assert_eq!(request["nPyramidResolutions"], 1);
    assert_eq!(request["pyramidScaleFactor"], 1);
    assert_eq!(request["tileSize"], 512);
    assert_eq!(request["applyLUTs"], false);
}

#[test]
fn test_silent_fail_returns_error_response() {
    let bridge = MockBridge::start(|_| Reply::Json(json!({"error": "Out of memory"})));
    let client = BridgeClient::from_config(&bridge.config());

    let options = ConvertOptions {
        silent_fail: true,
        ..ConvertOptions::default()
    };
    let response = client
        .convert(Path::new("/data/a.nd2"), Path::new("/tmp/a.tif"), &options)
        .unwrap();
    assert!(response.file().is_none());
    assert_eq!(response.error(), Some(&json!("Out of memory")));

    // Without silent fail the same answer is an error
    let err = client
        .convert(Path::new("/data/a.nd2"), Path::new("/tmp/a.tif"), &ConvertOptions::default())
        .unwrap_err();
    assert!(matches!(err, BridgeError::Operation { .. }));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_silent_bridge_times_out() {
    let bridge = MockBridge::start(|_| Reply::Silent(Duration::from_secs(2)));
    let config = BridgeConfig {
        metadata_timeout: 0.2,
        ..bridge.config()
    };
    let client = BridgeClient::from_config(&config);

    let start = Instant::now();
    let err = client
        .query_properties(Path::new("/data/slow.czi"), false)
        .unwrap_err();
    assert!(err.is_timeout(), "expected a timeout, got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_refused_connection() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = BridgeConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..BridgeConfig::default()
    };
    let client = BridgeClient::from_config(&config);

    let err = client
        .query_properties(Path::new("/data/slide.czi"), false)
        .unwrap_err();
    assert!(err.is_connection(), "expected a connection error, got {err:?}");
    assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
}
