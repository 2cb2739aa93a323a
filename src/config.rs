//! Configuration management for the Bio-Formats bridge.
//!
//! Settings come from command-line arguments via clap. Each one falls back
//! to an environment variable with the `BIOFORMATS_` prefix and then to a
//! default.
//!
//! # Environment Variables
//!
//! - `BIOFORMATS_HOST` - Bridge host (default: bioformat)
//! - `BIOFORMATS_PORT` - Bridge port (default: 4321)
//! - `BIOFORMATS_CONNECT_TIMEOUT` - Connect and write deadline in seconds (default: 1)
//! - `BIOFORMATS_METADATA_TIMEOUT` - Idle timeout of metadata calls in seconds (default: 15)
//! - `BIOFORMATS_CONVERSION_TIMEOUT` - Idle timeout of conversions in seconds (default: 12000)
//! - `BIOFORMATS_CACHE_CAPACITY` - Metadata responses kept in memory (default: 256)
//! - `BIOFORMATS_CACHE_TTL` - Lifetime of a cached response in seconds (default: unbounded)
//! - `BIOFORMATS_TILE_SIZE` - Tile edge of derived images (default: 256)
//! - `BIOFORMATS_COMPRESSION` - Compression of derived images (default: lzw)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::format::tiff::{Compression, TileOptions};
use crate::tile::DEFAULT_JPEG_QUALITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default bridge host.
pub const DEFAULT_HOST: &str = "bioformat";

/// Default bridge port.
pub const DEFAULT_PORT: u16 = 4321;

/// Default connect (and write) deadline in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: f64 = 1.0;

/// Default idle timeout of metadata calls in seconds.
pub const DEFAULT_METADATA_TIMEOUT: f64 = 15.0;

/// Default idle timeout of conversions in seconds (200 minutes).
pub const DEFAULT_CONVERSION_TIMEOUT: f64 = 12_000.0;

/// Default number of cached metadata responses.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default tile edge of derived images.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// Bridge Configuration
// =============================================================================

/// Compression of the derived pyramidal image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputCompression {
    None,
    #[default]
    Lzw,
    Deflate,
}

impl OutputCompression {
    /// TIFF compression scheme written for this choice.
    pub fn as_tiff(self) -> Compression {
        match self {
            OutputCompression::None => Compression::None,
            OutputCompression::Lzw => Compression::Lzw,
            OutputCompression::Deflate => Compression::Deflate,
        }
    }
}

/// Connection, cache and conversion settings shared by every command.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Host of the Bio-Formats bridge.
    #[arg(long, default_value = DEFAULT_HOST, env = "BIOFORMATS_HOST")]
    pub host: String,

    /// Port of the Bio-Formats bridge.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "BIOFORMATS_PORT")]
    pub port: u16,

    /// Connect and write deadline in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT, env = "BIOFORMATS_CONNECT_TIMEOUT")]
    pub connect_timeout: f64,

    /// Idle timeout of metadata calls in seconds.
    #[arg(long, default_value_t = DEFAULT_METADATA_TIMEOUT, env = "BIOFORMATS_METADATA_TIMEOUT")]
    pub metadata_timeout: f64,

    /// Idle timeout of conversions in seconds.
    ///
    /// The bridge sends nothing until a conversion is done, so this bounds
    /// the whole remote step.
    #[arg(long, default_value_t = DEFAULT_CONVERSION_TIMEOUT, env = "BIOFORMATS_CONVERSION_TIMEOUT")]
    pub conversion_timeout: f64,

    /// Maximum number of metadata responses kept in memory.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "BIOFORMATS_CACHE_CAPACITY")]
    pub cache_capacity: usize,

    /// Lifetime of a cached metadata response in seconds.
    ///
    /// If not specified, entries live until evicted.
    #[arg(long, env = "BIOFORMATS_CACHE_TTL")]
    pub cache_ttl: Option<u64>,

    /// Tile edge of derived images (multiple of 16).
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "BIOFORMATS_TILE_SIZE")]
    pub tile_size: u32,

    /// Compression of derived images.
    #[arg(long, value_enum, default_value_t = OutputCompression::Lzw, env = "BIOFORMATS_COMPRESSION")]
    pub compression: OutputCompression,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            conversion_timeout: DEFAULT_CONVERSION_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: None,
            tile_size: DEFAULT_TILE_SIZE,
            compression: OutputCompression::Lzw,
        }
    }
}

impl BridgeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Bridge host is required. Set --host or BIOFORMATS_HOST".to_string());
        }
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("metadata_timeout", self.metadata_timeout),
            ("conversion_timeout", self.conversion_timeout),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be a positive number of seconds"));
            }
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }
        if self.cache_ttl == Some(0) {
            return Err("cache_ttl must be greater than 0 when set".to_string());
        }

        if self.tile_size == 0 || self.tile_size % 16 != 0 {
            return Err("tile_size must be a non-zero multiple of 16".to_string());
        }

        Ok(())
    }

    /// Get the bridge address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection timeout. Values `validate` would reject fall back to the default.
    pub fn connect_timeout(&self) -> Duration {
        seconds(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn metadata_timeout(&self) -> Duration {
        seconds(self.metadata_timeout, DEFAULT_METADATA_TIMEOUT)
    }

    pub fn conversion_timeout(&self) -> Duration {
        seconds(self.conversion_timeout, DEFAULT_CONVERSION_TIMEOUT)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl.map(Duration::from_secs)
    }

    /// Tiling of derived files.
    pub fn tile_options(&self) -> TileOptions {
        TileOptions {
            tile_size: self.tile_size,
            compression: self.compression.as_tiff(),
        }
    }
}

/// Seconds as a `Duration`; zero, negative and non-finite values map to `default`.
fn seconds(value: f64, default: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::from_secs_f64(default)
    }
}

// =============================================================================
// CLI
// =============================================================================

/// bfbridge - Bio-Formats bridge client.
///
/// Queries image metadata from a Bio-Formats server and converts proprietary
/// microscopy files (CZI, LIF, ND2) to pyramidal tiled TIFF.
#[derive(Parser, Debug, Clone)]
#[command(name = "bfbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Identify the format of a local file from its signature.
    Detect(DetectConfig),

    /// Print the metadata of a file as JSON.
    Properties(PropertiesConfig),

    /// Convert a file to a pyramidal tiled TIFF.
    Convert(ConvertConfig),

    /// Extract one tile of a derived image as JPEG.
    Tile(TileConfig),
}

#[derive(Args, Debug, Clone)]
pub struct DetectConfig {
    /// File to inspect.
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PropertiesConfig {
    /// Source file, as seen by the bridge.
    pub path: PathBuf,

    /// Also print the format's original metadata.
    #[arg(long, default_value_t = false)]
    pub raw: bool,

    /// Also print the resolution pyramid reported by the bridge.
    #[arg(long, default_value_t = false)]
    pub pyramid: bool,

    /// Also print the plane table.
    #[arg(long, default_value_t = false)]
    pub planes: bool,

    #[command(flatten)]
    pub bridge: BridgeConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// Source file, as seen by the bridge.
    pub source: PathBuf,

    /// Destination of the derived pyramidal TIFF.
    pub destination: PathBuf,

    #[command(flatten)]
    pub bridge: BridgeConfig,
}

#[derive(Args, Debug, Clone)]
pub struct TileConfig {
    /// Derived pyramidal TIFF.
    pub path: PathBuf,

    /// Page (plane) index.
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    /// Resolution level (0 = full resolution).
    #[arg(long, default_value_t = 0)]
    pub level: usize,

    /// Tile index in row-major order.
    #[arg(long, default_value_t = 0)]
    pub index: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub quality: u8,

    /// Output JPEG file.
    #[arg(short, long)]
    pub output: PathBuf,
}

impl TileConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.quality == 0 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
