//! Tile previews of derived images.
//!
//! After conversion, a derived pyramidal TIFF can be checked by pulling
//! single tiles out of it and viewing them as JPEG:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         TilePreview          │
//! │  (page, level, index) → tile │
//! └──────────────┬───────────────┘
//!                │ Raster (any sample type)
//!                ▼
//! ┌──────────────────────────────┐
//! │       JpegTileEncoder        │
//! │  8-bit normalize → JPEG      │
//! └──────────────────────────────┘
//! ```

mod encoder;
mod preview;

pub use encoder::{
    clamp_quality, is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use preview::{LevelInfo, TilePreview};
