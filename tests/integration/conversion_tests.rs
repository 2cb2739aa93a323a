//! Conversion integration tests.
//!
//! Tests verify:
//! - Large images become pyramidal TIFF with one SubIFD per reduced level
//! - Small images are re-tiled without a pyramid
//! - Only the first page keeps its description
//! - Intermediate files are removed on success and on failure
//! - A conversion that fails while tiling leaves no file at the destination
//! - Failed or incomplete remote conversions surface as errors

use serde_json::json;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use bioformats_bridge::format::tiff::TiffPages;
use bioformats_bridge::{
    format_entry, BioFormatsFormat, BridgeClient, ConversionError, Convertor, DerivedFormat,
    ImageFormat, MetadataCache, TilePreview,
};

use super::test_utils::{
    converting_bridge, dir_entries, gradient_value, properties_body, write_intermediate,
    MockBridge, Reply, OME_DESCRIPTION,
};

/// Overwrite the first tile of `page` with bytes no decoder accepts.
fn corrupt_first_tile(path: &Path, page: usize) {
    let layout = TiffPages::open(path).unwrap().layout(page, 0).unwrap();
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(layout.offsets[0])).unwrap();
    file.write_all(&vec![0xFF; layout.byte_counts[0] as usize]).unwrap();
}

// =============================================================================
// Successful Conversions
// =============================================================================

#[test]
fn test_convert_large_image_to_pyramid() {
    let bridge = converting_bridge(properties_body(672, 512, 1), 672, 512, 1);
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.czi",
        format_entry(ImageFormat::Czi),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("slide.ome.tif");
    let outcome = format.convert(&destination).unwrap();

    assert_eq!(outcome.format, DerivedFormat::PyramidalOmeTiff);
    assert!(outcome.pyramid);
    assert_eq!(outcome.pages, 1);
    assert_eq!(outcome.levels, 3);

    // Only the derived file is left behind
    assert_eq!(dir_entries(dir.path()), vec!["slide.ome.tif".to_string()]);

    let preview = TilePreview::open(&destination).unwrap();
    assert_eq!(preview.page_count(), 1);
    assert_eq!(preview.level_count(0).unwrap(), 3);

    let base = preview.level_info(0, 0).unwrap();
    assert_eq!((base.width, base.height), (672, 512));
    assert_eq!((base.tiles_across, base.tiles_down), (3, 2));

    let smallest = preview.level_info(0, 2).unwrap();
    assert_eq!((smallest.width, smallest.height), (168, 128));
    assert_eq!(smallest.tile_count(), 1);

    let tile = preview.read_tile(0, 0, 0).unwrap();
    assert_eq!((tile.width, tile.height), (256, 256));
    assert_eq!(tile.data[1], gradient_value(1, 0, 0));
    assert_eq!(tile.data[256], gradient_value(0, 1, 0));

    let jpeg = preview.jpeg_tile(0, 1, 0, 80).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_convert_request_targets_hidden_intermediate() {
    let bridge = converting_bridge(properties_body(300, 300, 1), 300, 300, 1);
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.lif",
        format_entry(ImageFormat::Lif),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("out.tif");
    format.convert(&destination).unwrap();

    let convert = bridge
        .requests()
        .into_iter()
        .find(|request| request["action"] == "convert")
        .unwrap();
    let output = convert["output"].as_str().unwrap().to_string();
    assert!(output.starts_with(&dir.path().join(".out.").to_string_lossy().into_owned()));
    assert!(output.ends_with(".intermediate.tif"));
    assert_eq!(convert["tileSize"], 256);
    assert_eq!(convert["flatten"], true);
    assert!(!std::path::Path::new(&output).exists());
}

#[test]
fn test_convert_small_multi_plane_image() {
    let bridge = converting_bridge(properties_body(200, 100, 3), 200, 100, 3);
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/stack.nd2",
        format_entry(ImageFormat::Nd2),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("stack.tif");
    let outcome = format.convert(&destination).unwrap();

    assert_eq!(outcome.format, DerivedFormat::OmeTiff);
    assert!(!outcome.pyramid);
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.levels, 1);

    let pages = TiffPages::open(&destination).unwrap();
    assert_eq!(pages.page_count(), 3);
    assert_eq!(pages.level_count(0).unwrap(), 1);
    assert_eq!(pages.description(0).unwrap().as_deref(), Some(OME_DESCRIPTION));
    assert_eq!(pages.description(1).unwrap(), None);
    assert_eq!(pages.description(2).unwrap(), None);

    let plane = pages.read_page(2).unwrap();
    assert_eq!((plane.width, plane.height), (200, 100));
    assert_eq!(plane.data[5], gradient_value(5, 0, 2));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failed_remote_conversion() {
    let bridge = MockBridge::start(|request| match request["action"].as_str() {
        Some("properties") => Reply::Json(properties_body(1024, 1024, 1)),
        _ => Reply::Json(json!({"error": "Cannot convert file"})),
    });
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.czi",
        format_entry(ImageFormat::Czi),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("slide.tif");
    match format.convert(&destination) {
        Err(ConversionError::ConversionFailed { error, .. }) => {
            assert_eq!(error, Some(json!("Cannot convert file")));
        }
        other => panic!("expected a failed conversion, got {other:?}"),
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[test]
fn test_missing_pages_removes_intermediate() {
    // Metadata announces two planes, the bridge writes one
    let bridge = converting_bridge(properties_body(300, 300, 2), 300, 300, 1);
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.czi",
        format_entry(ImageFormat::Czi),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("slide.tif");
    match format.convert(&destination) {
        Err(ConversionError::MissingPages { expected, found }) => {
            assert_eq!((expected, found), (2, 1));
        }
        other => panic!("expected missing pages, got {other:?}"),
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[test]
fn test_metadata_failure_stops_before_convert() {
    let bridge = MockBridge::start(|_| Reply::Json(json!({"error": "Unreadable"})));
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.czi",
        format_entry(ImageFormat::Czi),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let err = format.convert(&dir.path().join("slide.tif")).unwrap_err();
    assert!(matches!(err, ConversionError::Metadata(_)));
    assert_eq!(bridge.count("convert"), 0);
}

#[test]
fn test_unreadable_page_leaves_no_output() {
    // Page 0 converts, page 1 fails to decode after the output was started
    let bridge = MockBridge::start(|request| match request["action"].as_str() {
        Some("properties") => Reply::Json(properties_body(300, 300, 2)),
        _ => {
            let output = request["output"].as_str().unwrap().to_string();
            write_intermediate(Path::new(&output), 300, 300, 2, OME_DESCRIPTION);
            corrupt_first_tile(Path::new(&output), 1);
            Reply::Json(json!({ "file": output }))
        }
    });
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new(
        "/data/slide.czi",
        format_entry(ImageFormat::Czi),
        &client,
        &cache,
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("slide.tif");
    let err = format.convert(&destination).unwrap_err();
    assert!(matches!(err, ConversionError::Tiff(_)), "got {err:?}");

    assert!(!destination.exists());
    assert!(dir_entries(dir.path()).is_empty());
}
