use std::time::Duration;

use thiserror::Error;

/// I/O errors that can occur when reading local image files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the underlying filesystem
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

/// Errors raised while talking to the Bio-Formats bridge
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Connect, send or read failed at the socket level
    #[error("Connection to Bio-Formats ({address}) has failed or has been interrupted: {message}")]
    Connection { address: String, message: String },

    /// Nothing arrived within the idle window
    #[error("Timeout error ({}s) while waiting for Bio-Formats response from {address}", .timeout.as_secs_f64())]
    Timeout { address: String, timeout: Duration },

    /// Response bytes are not a JSON object
    #[error("Malformed Bio-Formats response: {0}")]
    MalformedResponse(String),

    /// The bridge reported an `error` field
    #[error("Bio-Formats reported an error: {error}")]
    Operation { error: serde_json::Value },

    /// Request could not be serialized
    #[error("Failed to encode Bio-Formats request: {0}")]
    Encode(String),
}

impl BridgeError {
    /// Whether this is an idle-window timeout.
    ///
    /// Callers may retry metadata calls on timeout but should not blindly
    /// retry long conversions.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Whether this is a socket-level failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, BridgeError::Connection { .. })
    }
}

/// Errors raised while mapping bridge responses to image metadata
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// The metadata query itself failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Channels report different sample counts
    #[error("Differing SamplesPerPixel not supported: channel {channel} has {found}, channel 0 has {expected}")]
    InconsistentChannelLayout {
        channel: usize,
        expected: u32,
        found: u32,
    },

    /// Pixel type string is not one of the known OME pixel types
    #[error("Unknown pixel type: {0}")]
    UnknownPixelType(String),

    /// Unit string cannot be resolved by the unit registry
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    /// A key the mapper cannot do without is absent
    #[error("Missing required metadata field: {0}")]
    MissingField(&'static str),

    /// A key is present but its value has the wrong shape
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// A plane entry points outside the (C, Z, T) table
    #[error("Plane (c={c}, z={z}, t={t}) is outside the {size_c}x{size_z}x{size_t} plane table")]
    PlaneOutOfRange {
        c: u32,
        z: u32,
        t: u32,
        size_c: u32,
        size_z: u32,
        size_t: u32,
    },
}

/// Errors related to format detection
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file signature
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// No entry of the format table matches the file signature
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when reading or writing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading or writing the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only None, LZW and Deflate are supported)")]
    UnsupportedCompression(String),

    /// Image layout the engine does not handle (bit depth, predictor, ...)
    #[error("Unsupported image layout: {0}")]
    UnsupportedLayout(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// A segment could not be decompressed
    #[error("Failed to decompress segment: {0}")]
    Decompression(String),

    /// A segment could not be compressed
    #[error("Failed to compress segment: {0}")]
    Compression(String),

    /// Page index past the end of the IFD chain
    #[error("Page {page} out of range: file has {pages} page(s)")]
    PageOutOfRange { page: usize, pages: usize },

    /// Resolution level past the last SubIFD of a page
    #[error("Level {level} out of range: page has {levels} level(s)")]
    LevelOutOfRange { level: usize, levels: usize },

    /// Tile index past the last tile of a level
    #[error("Tile {index} out of range: level has {tiles} tile(s)")]
    TileOutOfRange { index: u32, tiles: u32 },
}

impl From<std::io::Error> for TiffError {
    fn from(err: std::io::Error) -> Self {
        TiffError::Io(err.into())
    }
}

/// Errors raised by the conversion pipeline
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    /// Transport-level failure of the remote conversion call
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The bridge answered without a `file` key
    #[error("Bio-Formats conversion failed: {reason}")]
    ConversionFailed {
        reason: String,
        error: Option<serde_json::Value>,
    },

    /// The intermediate image could not be read or the output written
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Source metadata could not be obtained
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The intermediate image holds fewer pages than the source has planes
    #[error("Intermediate image has {found} page(s), expected {expected}")]
    MissingPages { expected: usize, found: usize },
}

/// Errors that can occur when producing a preview tile
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Reading the tile from the derived image failed
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Raster cannot be shown as a preview
    #[error("Unsupported raster for preview: {message}")]
    UnsupportedRaster { message: String },

    /// JPEG encoding failed
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },
}
