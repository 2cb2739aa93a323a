//! Image metadata derived from bridge responses.
//!
//! - [`model`] - value types (`ImageMetadata`, `Pyramid`, `PlanesInfo`, ...)
//! - [`units`] - unit registry and dimensioned quantities
//! - [`mapper`] - response to metadata mapping rules

pub mod mapper;
pub mod model;
pub mod units;

pub use mapper::{map_known, map_main, map_planes, map_pyramid, map_raw, parse_physical_size};
pub use model::{
    AssociatedImage, Color, ImageChannel, ImageMetadata, MetadataStore, Microscope, Objective,
    PixelType, PlaneInfo, PlanesInfo, Pyramid, PyramidTier,
};
pub use units::{Dimension, Quantity, Unit, UnitRegistry, UNIT_REGISTRY};
