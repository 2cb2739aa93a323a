//! Format plugin integration tests.
//!
//! Tests verify:
//! - Detected files are wrapped with the right table entry
//! - Metadata is fetched once per file across plugin instances
//! - Cached entries expire after their time-to-live
//! - Raw metadata is namespaced and never cached

use std::thread;
use std::time::Duration;

use bioformats_bridge::metadata::Unit;
use bioformats_bridge::{
    format_entry, resolve_key, BioFormatsFormat, BridgeClient, ImageFormat, MetadataCache,
    MetadataParser,
};

use super::test_utils::{properties_body, write_czi_stub, MockBridge, Reply};

#[test]
fn test_metadata_shared_between_instances() {
    let bridge = MockBridge::start(|_| Reply::Json(properties_body(2048, 1536, 4)));
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::from_config(&bridge.config());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slide.czi");
    write_czi_stub(&path);

    let first = BioFormatsFormat::open(&path, &client, &cache).unwrap();
    assert_eq!(first.entry().format, ImageFormat::Czi);

    let main = first.parse_main_metadata().unwrap();
    assert_eq!((main.width, main.height), (2048, 1536));
    assert_eq!(main.n_planes(), 4);
    assert!(!main.is_complete);

    let second = BioFormatsFormat::open(&path, &client, &cache).unwrap();
    let known = second.parse_known_metadata().unwrap();
    assert!(known.is_complete);
    let pixel_size = known.physical_size_x.unwrap();
    assert_eq!(pixel_size.unit, Unit::Micrometer);
    assert!((pixel_size.value - 0.25).abs() < 1e-12);
    assert_eq!(second.parse_pyramid().unwrap().n_levels(), 1);

    assert_eq!(bridge.count("properties"), 1);
    assert!(cache.contains(&resolve_key(&path)));

    // The bridge sees the resolved path
    let request = &bridge.requests()[0];
    assert_eq!(
        request["path"],
        resolve_key(&path).to_string_lossy().into_owned()
    );
}

#[test]
fn test_cache_entries_expire() {
    let bridge = MockBridge::start(|_| Reply::Json(properties_body(512, 512, 1)));
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::with_capacity(4, Some(Duration::from_millis(50)));
    let entry = format_entry(ImageFormat::Lif);

    BioFormatsFormat::new("/data/a.lif", entry, &client, &cache)
        .parse_main_metadata()
        .unwrap();
    thread::sleep(Duration::from_millis(120));
    BioFormatsFormat::new("/data/a.lif", entry, &client, &cache)
        .parse_main_metadata()
        .unwrap();

    assert_eq!(bridge.count("properties"), 2);
}

#[test]
fn test_raw_metadata_is_namespaced() {
    let bridge = MockBridge::start(|_| Reply::Json(properties_body(512, 512, 1)));
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();
    let format = BioFormatsFormat::new("/data/a.nd2", format_entry(ImageFormat::Nd2), &client, &cache);

    let raw = format.parse_raw_metadata().unwrap();
    assert!(raw.contains_key("ND2.Instrument|Objective|Model"));
    assert!(raw.contains_key("Bioformats.Pixels.SizeX"));
    assert!(!raw.contains_key("Bioformats.Planes"));

    let request = &bridge.requests()[0];
    assert_eq!(request["includeRawProperties"], true);
    assert!(cache.is_empty());
}

#[test]
fn test_unsupported_file_is_rejected() {
    let bridge = MockBridge::start(|_| Reply::Json(properties_body(512, 512, 1)));
    let client = BridgeClient::from_config(&bridge.config());
    let cache = MetadataCache::new();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.tif");
    std::fs::write(&path, b"II*\x00\x08\x00\x00\x00 plain tiff header").unwrap();

    assert!(BioFormatsFormat::open(&path, &client, &cache).is_err());
    assert!(BioFormatsFormat::open(dir.path().join("missing.czi"), &client, &cache).is_err());
    assert!(bridge.requests().is_empty());
}
