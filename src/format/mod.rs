//! Source formats read through the Bio-Formats bridge.
//!
//! # Format Detection
//!
//! Use [`detect::detect_format`] to identify a source file from its leading
//! bytes. Currently supported formats:
//!
//! - **Zeiss CZI**: `ZISRAWFILE` magic
//! - **Leica LIF**: `0x70` tag with `0x2A` at byte 8
//! - **Nikon ND2**: `DA CE BE 0A` or JPEG 2000 container magic
//!
//! Detected files are wrapped in a [`plugin::BioFormatsFormat`], which
//! answers metadata queries and converts to pyramidal TIFF. The [`tiff`]
//! engine reads and writes the TIFF files involved in conversion.

pub mod detect;
pub mod plugin;
pub mod tiff;

pub use detect::{detect_format, format_entry, match_signature, FormatEntry, ImageFormat, FORMATS};
pub use plugin::{BioFormatsFormat, Convertor, MetadataParser};
