//! Test utilities for integration tests.
//!
//! This module provides a mock Bio-Formats bridge served over loopback TCP
//! and helpers for building bridge responses and intermediate TIFF files.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bioformats_bridge::format::tiff::SampleFormat;
use bioformats_bridge::{BridgeConfig, Raster, TiffWriter, TileOptions};

// =============================================================================
// Mock Bridge
// =============================================================================

/// What the mock bridge does with one request.
pub enum Reply {
    /// Write the JSON document and close the connection.
    Json(Value),

    /// Keep the connection open without answering, then close it.
    Silent(Duration),
}

/// A Bio-Formats bridge stand-in serving one request per connection.
///
/// Every decoded request is recorded before the handler runs.
pub struct MockBridge {
    port: u16,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockBridge {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => serve(stream, &handler, &log),
                    Err(_) => break,
                }
            }
        });

        Self { port, requests }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client configuration pointing at this bridge.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            ..BridgeConfig::default()
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received for `action`.
    pub fn count(&self, action: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request["action"] == action)
            .count()
    }
}

fn serve<F>(stream: TcpStream, handler: &F, log: &Mutex<Vec<Value>>)
where
    F: Fn(&Value) -> Reply,
{
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    let request: Value = serde_json::from_str(line.trim_end()).unwrap_or(Value::Null);
    log.lock().unwrap().push(request.clone());

    let mut stream = stream;
    match handler(&request) {
        Reply::Json(body) => {
            let bytes = serde_json::to_vec(&body).unwrap();
            let _ = stream.write_all(&bytes);
            let _ = stream.flush();
        }
        Reply::Silent(duration) => thread::sleep(duration),
    }
}

// =============================================================================
// Bridge Responses
// =============================================================================

/// `properties` response of a single-channel 8-bit image.
pub fn properties_body(width: u32, height: u32, size_z: u32) -> Value {
    json!({
        "Bioformats.Pixels.PixelType": "uint8",
        "Bioformats.Pixels.SizeX": width,
        "Bioformats.Pixels.SizeY": height,
        "Bioformats.Pixels.SizeZ": size_z,
        "Bioformats.Pixels.SizeT": 1,
        "Bioformats.Pixels.EffectiveSizeC": 1,
        "Bioformats.Pixels.SamplesPerPixel": 1,
        "Bioformats.Pixels.PhysicalSizeX": 0.25,
        "Bioformats.Pixels.PhysicalSizeXUnit": "µm",
        "Bioformats.Pixels.PhysicalSizeY": 0.25,
        "Bioformats.Pixels.PhysicalSizeYUnit": "µm",
        "Bioformats.Channels": [{"SamplesPerPixel": 1, "SuggestedName": "DAPI"}],
        "Bioformats.Pyramid": [{"Width": width, "Height": height}],
        "Bioformats.Planes": [{"TheC": 0, "TheZ": 0, "TheT": 0, "_Index": 0, "_Series": 0}],
        "Instrument|Objective|Model": "Plan-Apochromat 20x"
    })
}

/// Answer `properties` with `body` and `convert` by writing `pages` planes
/// of `width`×`height` at the requested output path.
pub fn converting_bridge(body: Value, width: u32, height: u32, pages: usize) -> MockBridge {
    MockBridge::start(move |request| match request["action"].as_str() {
        Some("properties") => Reply::Json(body.clone()),
        Some("convert") => {
            let output = request["output"].as_str().unwrap_or_default().to_string();
            write_intermediate(Path::new(&output), width, height, pages, OME_DESCRIPTION);
            Reply::Json(json!({ "file": output }))
        }
        _ => Reply::Json(json!({ "error": "unknown action" })),
    })
}

pub const OME_DESCRIPTION: &str = "<?xml version=\"1.0\"?><OME/>";

// =============================================================================
// TIFF Helpers
// =============================================================================

/// Value of pixel (x, y) on plane `page` of a gradient image.
pub fn gradient_value(x: u32, y: u32, page: usize) -> u8 {
    ((x + 2 * y + 7 * page as u32) % 251) as u8
}

pub fn gradient_raster(width: u32, height: u32, page: usize) -> Raster {
    let mut data = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(gradient_value(x, y, page));
        }
    }
    Raster::new(width, height, 1, 8, SampleFormat::Uint, data).unwrap()
}

/// Write a flat (single-level) tiled TIFF, as the bridge would.
pub fn write_intermediate(path: &Path, width: u32, height: u32, pages: usize, description: &str) {
    let mut writer = TiffWriter::create(path, TileOptions::default()).unwrap();
    for page in 0..pages {
        writer
            .write_page(&[gradient_raster(width, height, page)], Some(description))
            .unwrap();
    }
    writer.finish().unwrap();
}

/// A file the format detector recognizes as CZI.
pub fn write_czi_stub(path: &Path) {
    let mut bytes = b"ZISRAWFILE".to_vec();
    bytes.extend_from_slice(&[0u8; 22]);
    std::fs::write(path, bytes).unwrap();
}

/// Names of the entries of a directory, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
