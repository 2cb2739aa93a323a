//! # Bio-Formats Bridge
//!
//! Client library for a Bio-Formats server reached over TCP.
//!
//! Proprietary microscopy files (CZI, LIF, ND2) cannot be decoded locally.
//! This library asks a remote Bio-Formats process for their metadata and
//! for a flattened OME-TIFF rendition, then re-tiles that rendition into a
//! pyramidal BigTIFF that standard viewers can stream.
//!
//! ## Features
//!
//! - **Adaptive framing**: responses are read until the server goes quiet,
//!   with a long wait for the first bytes and a short one afterwards
//! - **Metadata cache**: one `properties` call per file, shared by every
//!   reader of that file
//! - **Metadata mapping**: bridge key/value pairs become typed image
//!   metadata with units, channels, pyramid and plane tables
//! - **Conversion**: remote flatten, local pyramid build, cleanup
//!
//! ## Architecture
//!
//! - [`bridge`] - wire codec, TCP transport, client and metadata cache
//! - [`metadata`] - metadata model, units and response mapping
//! - [`mod@format`] - format detection, the bridge plugin and the TIFF engine
//! - [`convert`] - rasters and the two-stage conversion pipeline
//! - [`tile`] - JPEG previews of derived tiles
//! - [`io`] - positioned reads over files and buffers
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use bioformats_bridge::{BioFormatsFormat, BridgeClient, BridgeConfig, MetadataCache, MetadataParser};
//!
//! let config = BridgeConfig::default();
//! let client = BridgeClient::from_config(&config);
//! let cache = MetadataCache::from_config(&config);
//!
//! let format = BioFormatsFormat::open("/data/slide.czi", &client, &cache)?;
//! let metadata = format.parse_main_metadata()?;
//! println!("{}x{} px, {} planes", metadata.width, metadata.height, metadata.n_planes());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod io;
pub mod metadata;
pub mod tile;

// Re-export commonly used types
pub use bridge::{
    resolve_key, BridgeClient, BridgeResponse, ConvertOptions, MetadataCache, SocketTransport,
    Timeouts, Transport,
};
pub use config::{
    BridgeConfig, Cli, Command, ConvertConfig, DetectConfig, OutputCompression, PropertiesConfig,
    TileConfig,
};
pub use convert::{ConversionOutcome, ConversionPipeline, DerivedFormat, Raster};
pub use error::{
    BridgeError, ConversionError, FormatError, IoError, MetadataError, TiffError, TileError,
};
pub use format::tiff::{strip_descriptions, Compression, TiffPages, TiffWriter, TileOptions};
pub use format::{
    detect_format, format_entry, BioFormatsFormat, Convertor, FormatEntry, ImageFormat,
    MetadataParser, FORMATS,
};
pub use io::{FileRangeReader, MemoryRangeReader, RangeReader};
pub use metadata::{
    ImageMetadata, MetadataStore, PixelType, PlanesInfo, Pyramid, Quantity, Unit, UNIT_REGISTRY,
};
pub use tile::{
    clamp_quality, is_valid_quality, JpegTileEncoder, LevelInfo, TilePreview, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
