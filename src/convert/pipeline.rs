//! Conversion of a proprietary file to a pyramidal tiled TIFF.
//!
//! # Flow
//!
//! 1. **Remote flatten**: the bridge decodes the source and writes a flat,
//!    single-resolution intermediate TIFF next to the destination.
//! 2. **Local re-tile**: every plane of the intermediate is read back and
//!    written as one page of a tiled BigTIFF. When the image is larger than
//!    a tile in both dimensions, each page gets 2×2 mean reductions as
//!    SubIFDs down to the first level that fits in one tile.
//!    Levels are written as they are produced, so at most a level and its
//!    reduction are held in memory per page.
//! 3. **Cleanup**: the intermediate is deleted whatever happens next.
//! 4. **Description fix-up**: the page description (OME-XML) is kept on the
//!    first page only.
//! 5. **Publish**: the output is written to a hidden partial file and only
//!    renamed onto the destination once complete, so a failed conversion
//!    leaves no file at the destination.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{BridgeClient, ConvertOptions, SocketTransport, Transport};
use crate::error::{ConversionError, IoError};
use crate::format::tiff::{strip_descriptions, TiffPages, TiffWriter, TileOptions};
use crate::metadata::ImageMetadata;

use super::raster::Raster;

/// Standard format of a converted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DerivedFormat {
    /// Single-resolution tiled OME-TIFF
    OmeTiff,
    /// Tiled OME-TIFF with SubIFD reductions
    PyramidalOmeTiff,
}

impl DerivedFormat {
    pub fn name(self) -> &'static str {
        match self {
            DerivedFormat::OmeTiff => "OME-TIFF",
            DerivedFormat::PyramidalOmeTiff => "Pyramidal OME-TIFF",
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    pub format: DerivedFormat,
    pub pyramid: bool,
    /// Pages written, one per plane
    pub pages: usize,
    /// Resolution levels per page, the full resolution included
    pub levels: usize,
}

/// Whether an image needs reduced resolutions at this tile size.
pub fn need_pyramid(width: u32, height: u32, tile_size: u32) -> bool {
    width > tile_size && height > tile_size
}

/// Resolution levels of one page, produced lazily.
///
/// Yields the full resolution followed by 2×2 mean reductions, stopping at
/// the first level that fits in one tile. Each reduction is computed when
/// its parent is yielded, so a consumer that drops every level before asking
/// for the next holds at most two levels.
pub struct PyramidLevels {
    next: Option<Raster>,
    tile_size: Option<u32>,
}

impl PyramidLevels {
    /// Full resolution only.
    pub fn single(full: Raster) -> Self {
        Self {
            next: Some(full),
            tile_size: None,
        }
    }
}

impl Iterator for PyramidLevels {
    type Item = Raster;

    fn next(&mut self) -> Option<Raster> {
        let current = self.next.take()?;
        if let Some(tile_size) = self.tile_size {
            if !current.fits_in_tile(tile_size) {
                self.next = Some(current.downsample_mean());
            }
        }
        Some(current)
    }
}

/// Levels of `full` down to the first one that fits in a `tile_size` tile.
pub fn pyramid_levels(full: Raster, tile_size: u32) -> PyramidLevels {
    PyramidLevels {
        next: Some(full),
        tile_size: Some(tile_size),
    }
}

/// Hidden, per-invocation path next to `destination` ending in `suffix`.
fn sibling_path(destination: &Path, suffix: &str) -> PathBuf {
    let dir = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(format!(".{stem}.{}.{suffix}", Uuid::new_v4()))
}

/// Hidden, per-invocation intermediate path next to `destination`.
pub fn intermediate_path(destination: &Path) -> PathBuf {
    sibling_path(destination, "intermediate.tif")
}

/// Hidden path the output is written to before it is renamed onto `destination`.
pub fn partial_path(destination: &Path) -> PathBuf {
    sibling_path(destination, "partial.tif")
}

/// Deletes a temporary file when dropped.
struct TempFileGuard {
    path: PathBuf,
    kind: &'static str,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), kind = self.kind, "Removed temporary file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                kind = self.kind,
                error = %e,
                "Failed to remove temporary file"
            ),
        }
    }
}

/// Two-stage converter: remote flatten, then local pyramidal tiling.
pub struct ConversionPipeline<'a, T: Transport = SocketTransport> {
    client: &'a BridgeClient<T>,
    options: TileOptions,
}

impl<'a, T: Transport> ConversionPipeline<'a, T> {
    pub fn new(client: &'a BridgeClient<T>, options: TileOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> TileOptions {
        self.options
    }

    /// Derived format for an image of this size.
    pub fn derived_format(&self, metadata: &ImageMetadata) -> DerivedFormat {
        if need_pyramid(metadata.width, metadata.height, self.options.tile_size) {
            DerivedFormat::PyramidalOmeTiff
        } else {
            DerivedFormat::OmeTiff
        }
    }

    /// Convert `source` (described by `metadata`) into `destination`.
    pub fn run(
        &self,
        source: &Path,
        destination: &Path,
        metadata: &ImageMetadata,
    ) -> Result<ConversionOutcome, ConversionError> {
        let tile_size = self.options.tile_size;
        let intermediate = intermediate_path(destination);

        info!(
            source = %source.display(),
            destination = %destination.display(),
            "Starting Bio-Formats conversion"
        );

        let response = self.client.convert(
            source,
            &intermediate,
            &ConvertOptions {
                tile_size: Some(tile_size),
                silent_fail: true,
                ..ConvertOptions::default()
            },
        )?;
        let guard = TempFileGuard {
            path: intermediate.clone(),
            kind: "intermediate",
        };

        if response.file().is_none() {
            return Err(ConversionError::ConversionFailed {
                reason: format!("no output file reported for {}", source.display()),
                error: response.error().cloned(),
            });
        }

        let n_planes = metadata.n_planes();
        let pages = TiffPages::open(&intermediate)?;
        if n_planes == 0 || pages.page_count() < n_planes {
            return Err(ConversionError::MissingPages {
                expected: n_planes,
                found: pages.page_count(),
            });
        }
        let description = pages.description(0)?;

        let pyramid = need_pyramid(metadata.width, metadata.height, tile_size);
        let partial = TempFileGuard {
            path: partial_path(destination),
            kind: "partial output",
        };
        let mut writer = TiffWriter::create(&partial.path, self.options)?;
        let mut levels = 1;

        for page in 0..n_planes {
            let full = pages.read_page(page)?;
            let page_levels = if pyramid {
                pyramid_levels(full, tile_size)
            } else {
                PyramidLevels::single(full)
            };
            levels = writer.write_levels(page_levels, description.as_deref())?;
        }
        writer.finish()?;
        drop(pages);
        drop(guard);

        match strip_descriptions(&partial.path) {
            Ok(stripped) => debug!(pages = stripped, "Removed descriptions after first page"),
            Err(e) => debug!(error = %e, "Could not remove page descriptions"),
        }

        fs::rename(&partial.path, destination).map_err(IoError::from)?;
        drop(partial);

        let outcome = ConversionOutcome {
            format: self.derived_format(metadata),
            pyramid,
            pages: n_planes,
            levels,
        };
        info!(
            destination = %destination.display(),
            format = outcome.format.name(),
            pages = outcome.pages,
            levels = outcome.levels,
            "Conversion complete"
        );
        Ok(outcome)
    }
}
