//! The Bio-Formats format plugin.
//!
//! Every format in [`FORMATS`](super::detect::FORMATS) is handled the same
//! way: metadata comes from the bridge and pixels are only available after a
//! conversion. One generic [`BioFormatsFormat`] therefore serves all of
//! them, parameterized by its table entry.
//!
//! The two capabilities of a format are separate traits:
//!
//! - [`MetadataParser`]: main, known, pyramid, planes and raw metadata
//! - [`Convertor`]: conversion to a standard pyramidal TIFF

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::bridge::{resolve_key, BridgeClient, BridgeResponse, MetadataCache, SocketTransport, Transport};
use crate::convert::{need_pyramid, ConversionOutcome, ConversionPipeline, DerivedFormat};
use crate::error::{BridgeError, ConversionError, FormatError, MetadataError};
use crate::format::tiff::TileOptions;
use crate::metadata::{
    map_known, map_main, map_planes, map_pyramid, map_raw, ImageMetadata, MetadataStore,
    PlanesInfo, Pyramid,
};

use super::detect::{detect_format, FormatEntry};

// =============================================================================
// Capabilities
// =============================================================================

/// Metadata side of a format.
pub trait MetadataParser {
    /// Structural metadata: size, planes, pixel type, channels.
    fn parse_main_metadata(&self) -> Result<ImageMetadata, MetadataError>;

    /// Main metadata completed with acquisition details.
    fn parse_known_metadata(&self) -> Result<ImageMetadata, MetadataError>;

    fn parse_pyramid(&self) -> Result<Pyramid, MetadataError>;

    fn parse_planes(&self) -> Result<PlanesInfo, MetadataError>;

    /// The format's own key/value metadata.
    fn parse_raw_metadata(&self) -> Result<MetadataStore, MetadataError>;
}

/// Conversion side of a format.
pub trait Convertor {
    fn need_pyramid(&self) -> Result<bool, ConversionError>;

    /// Convert the source file into `destination`.
    fn convert(&self, destination: &Path) -> Result<ConversionOutcome, ConversionError>;

    /// Format of the file [`convert`](Convertor::convert) produces.
    fn conversion_format(&self) -> Result<DerivedFormat, ConversionError>;
}

// =============================================================================
// BioFormatsFormat
// =============================================================================

/// A source file decoded by the bridge.
///
/// Main metadata is computed once per instance; the underlying response is
/// shared between instances through the [`MetadataCache`].
pub struct BioFormatsFormat<'a, T: Transport = SocketTransport> {
    path: PathBuf,
    entry: &'static FormatEntry,
    client: &'a BridgeClient<T>,
    cache: &'a MetadataCache,
    tile_options: TileOptions,
    main: OnceCell<ImageMetadata>,
}

impl<'a, T: Transport> BioFormatsFormat<'a, T> {
    /// Detect the format of a local file and wrap it.
    pub fn open(
        path: impl Into<PathBuf>,
        client: &'a BridgeClient<T>,
        cache: &'a MetadataCache,
    ) -> Result<Self, FormatError> {
        let path = path.into();
        let entry = detect_format(&path)?;
        debug!(path = %path.display(), format = entry.name, "Detected format");
        Ok(Self::new(path, entry, client, cache))
    }

    /// Wrap a file whose format is already known.
    pub fn new(
        path: impl Into<PathBuf>,
        entry: &'static FormatEntry,
        client: &'a BridgeClient<T>,
        cache: &'a MetadataCache,
    ) -> Self {
        Self {
            path: path.into(),
            entry,
            client,
            cache,
            tile_options: TileOptions::default(),
            main: OnceCell::new(),
        }
    }

    /// Tiling used by [`Convertor::convert`].
    pub fn with_tile_options(mut self, options: TileOptions) -> Self {
        self.tile_options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self) -> &'static FormatEntry {
        self.entry
    }

    /// Namespace of the format's raw metadata keys.
    pub fn identifier(&self) -> &'static str {
        self.entry.identifier
    }

    /// The non-raw `properties` response, through the cache.
    fn properties(&self) -> Result<Arc<BridgeResponse>, BridgeError> {
        let key = resolve_key(&self.path);
        self.cache
            .get_or_fetch(&key, || self.client.query_properties(&key, false))
    }

    /// Memoized main metadata.
    pub fn main_metadata(&self) -> Result<&ImageMetadata, MetadataError> {
        self.main
            .get_or_try_init(|| map_main(&*self.properties()?))
    }
}

impl<T: Transport> MetadataParser for BioFormatsFormat<'_, T> {
    fn parse_main_metadata(&self) -> Result<ImageMetadata, MetadataError> {
        self.main_metadata().cloned()
    }

    fn parse_known_metadata(&self) -> Result<ImageMetadata, MetadataError> {
        let main = self.main_metadata()?;
        map_known(&*self.properties()?, main)
    }

    fn parse_pyramid(&self) -> Result<Pyramid, MetadataError> {
        map_pyramid(&*self.properties()?)
    }

    fn parse_planes(&self) -> Result<PlanesInfo, MetadataError> {
        let main = self.main_metadata()?;
        map_planes(&*self.properties()?, main)
    }

    fn parse_raw_metadata(&self) -> Result<MetadataStore, MetadataError> {
        let response = self.client.query_properties(&self.path, true)?;
        Ok(map_raw(&response, self.identifier()))
    }
}

impl<T: Transport> Convertor for BioFormatsFormat<'_, T> {
    fn need_pyramid(&self) -> Result<bool, ConversionError> {
        let main = self.main_metadata()?;
        Ok(need_pyramid(main.width, main.height, self.tile_options.tile_size))
    }

    fn convert(&self, destination: &Path) -> Result<ConversionOutcome, ConversionError> {
        let main = self.main_metadata()?;
        ConversionPipeline::new(self.client, self.tile_options).run(&self.path, destination, main)
    }

    fn conversion_format(&self) -> Result<DerivedFormat, ConversionError> {
        let main = self.main_metadata()?;
        Ok(ConversionPipeline::new(self.client, self.tile_options).derived_format(main))
    }
}
