//! Tile access on derived pyramidal files.
//!
//! A converted file stores one page per plane and the reduced resolutions of
//! each page as SubIFDs. A tile is addressed by (page, level, index), where
//! the index counts tiles row-major within the level.

use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::convert::raster::Raster;
use crate::error::{TiffError, TileError};
use crate::format::tiff::{Segmentation, TiffPages};

use super::encoder::JpegTileEncoder;

/// Geometry of one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_across: u32,
    pub tiles_down: u32,
}

impl LevelInfo {
    pub fn tile_count(&self) -> u32 {
        self.tiles_across * self.tiles_down
    }

    /// Row-major index of the tile at column `x`, row `y`.
    pub fn tile_index(&self, x: u32, y: u32) -> Option<u32> {
        (x < self.tiles_across && y < self.tiles_down).then(|| y * self.tiles_across + x)
    }
}

/// Read-only view of a derived pyramidal TIFF.
pub struct TilePreview {
    pages: TiffPages,
    encoder: JpegTileEncoder,
}

impl TilePreview {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let pages = TiffPages::open(path.as_ref())?;
        debug!(
            path = %path.as_ref().display(),
            pages = pages.page_count(),
            "Opened derived image"
        );
        Ok(Self {
            pages,
            encoder: JpegTileEncoder::new(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    pub fn level_count(&self, page: usize) -> Result<usize, TileError> {
        Ok(self.pages.level_count(page)?)
    }

    /// Geometry of a level of a page.
    pub fn level_info(&self, page: usize, level: usize) -> Result<LevelInfo, TileError> {
        let layout = self.pages.layout(page, level)?;
        let Segmentation::Tiled {
            tile_width,
            tile_height,
        } = layout.segmentation
        else {
            return Err(
                TiffError::UnsupportedLayout("image is striped, not tiled".to_string()).into(),
            );
        };
        Ok(LevelInfo {
            level,
            width: layout.width,
            height: layout.height,
            tile_width,
            tile_height,
            tiles_across: layout.width.div_ceil(tile_width),
            tiles_down: layout.height.div_ceil(tile_height),
        })
    }

    /// Decode one full tile, edge padding included.
    pub fn read_tile(&self, page: usize, level: usize, index: u32) -> Result<Raster, TileError> {
        Ok(self.pages.read_tile(page, level, index)?)
    }

    /// Decode one tile and encode it as JPEG.
    pub fn jpeg_tile(
        &self,
        page: usize,
        level: usize,
        index: u32,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        let raster = self.read_tile(page, level, index)?;
        self.encoder.encode(&raster, quality)
    }
}
