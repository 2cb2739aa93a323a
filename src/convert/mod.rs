//! Conversion of bridge output to pyramidal tiled TIFF.
//!
//! - [`raster`] - in-memory planes and 2×2 mean reduction
//! - [`pipeline`] - remote flatten, local re-tile, cleanup

pub mod pipeline;
pub mod raster;

pub use pipeline::{
    intermediate_path, need_pyramid, partial_path, pyramid_levels, ConversionOutcome,
    ConversionPipeline, DerivedFormat, PyramidLevels,
};
pub use raster::Raster;
