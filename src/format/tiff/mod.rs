//! TIFF engine for the local re-tiling stage.
//!
//! Reads the intermediate file produced by the bridge and writes the
//! derived pyramidal file.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header. Decoded rasters are always little-endian.
//!
//! - **Classic TIFF vs BigTIFF**: the reader accepts both; the writer always
//!   produces BigTIFF so large plane stacks never overflow 32-bit offsets.
//!
//! - **Pages and levels**: every top-level IFD is a page (one plane of the
//!   source image). Reduced resolutions of a page hang off its SubIFDs tag.
//!
//! - **Inline vs offset values**: small values are stored inline in the IFD
//!   entry, larger values at an offset pointed to by the entry.

mod comments;
mod compression;
mod pages;
mod parser;
mod tags;
mod values;
mod writer;

pub use comments::strip_descriptions;
pub use compression::{compress, decompress};
pub use pages::{ImageLayout, Segmentation, TiffPages};
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{Compression, FieldType, SampleFormat, TiffTag};
pub use values::{parse_u64_array, ValueReader};
pub use writer::{TiffWriter, TileOptions};
