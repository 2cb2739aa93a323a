//! Page-level access to a TIFF file.
//!
//! A "page" is one IFD of the top-level chain; each page may carry reduced
//! resolutions in SubIFDs ("levels", level 0 being the page itself). Pixel
//! data is decoded into a [`Raster`] regardless of tiling, planar
//! configuration, compression or byte order.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::convert::raster::{check_sample_layout, Raster};
use crate::error::TiffError;
use crate::io::{FileRangeReader, RangeReader};

use super::compression::{decompress, undo_horizontal_predictor};
use super::parser::{ByteOrder, Ifd, TiffHeader};
use super::tags::{
    Compression, SampleFormat, TiffTag, PLANAR_SEPARATE, PREDICTOR_HORIZONTAL, PREDICTOR_NONE,
};
use super::values::ValueReader;

/// Safety limit on the number of pages followed in the IFD chain.
const MAX_PAGES: usize = 65_536;

// =============================================================================
// Layout
// =============================================================================

/// How pixel data of one IFD is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    Tiled { tile_width: u32, tile_height: u32 },
    Striped { rows_per_strip: u32 },
}

/// Everything needed to decode the pixels of one IFD.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    pub compression: Compression,
    pub predictor: u16,
    pub planar_separate: bool,
    pub segmentation: Segmentation,
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
}

impl ImageLayout {
    /// Segment width, height, and grid size (across, down).
    fn grid(&self) -> (u32, u32, u32, u32) {
        match self.segmentation {
            Segmentation::Tiled {
                tile_width,
                tile_height,
            } => (
                tile_width,
                tile_height,
                self.width.div_ceil(tile_width),
                self.height.div_ceil(tile_height),
            ),
            Segmentation::Striped { rows_per_strip } => (
                self.width,
                rows_per_strip,
                1,
                self.height.div_ceil(rows_per_strip),
            ),
        }
    }

    fn planes(&self) -> u32 {
        if self.planar_separate {
            self.samples_per_pixel as u32
        } else {
            1
        }
    }

    fn samples_per_segment_pixel(&self) -> usize {
        if self.planar_separate {
            1
        } else {
            self.samples_per_pixel as usize
        }
    }

    /// Number of tiles per plane, or `None` for striped images.
    pub fn tile_count(&self) -> Option<u32> {
        match self.segmentation {
            Segmentation::Tiled { .. } => {
                let (_, _, across, down) = self.grid();
                Some(across * down)
            }
            Segmentation::Striped { .. } => None,
        }
    }
}

// =============================================================================
// TiffPages
// =============================================================================

/// A TIFF file opened for page reads.
pub struct TiffPages<R: RangeReader = FileRangeReader> {
    reader: R,
    header: TiffHeader,
    pages: Vec<Ifd>,
}

impl TiffPages<FileRangeReader> {
    /// Open a local TIFF file and walk its top-level IFD chain.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TiffError> {
        Self::from_reader(FileRangeReader::open(path)?)
    }
}

impl<R: RangeReader> TiffPages<R> {
    /// Parse the header and every top-level IFD of `reader`.
    pub fn from_reader(reader: R) -> Result<Self, TiffError> {
        let header = TiffHeader::read(&reader)?;

        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && pages.len() < MAX_PAGES {
            if !seen.insert(offset) {
                debug!(offset, "IFD chain loops back, stopping");
                break;
            }
            let ifd = Ifd::read(&reader, &header, offset)?;
            offset = ifd.next_ifd_offset;
            pages.push(ifd);
        }

        debug!(
            file = reader.identifier(),
            pages = pages.len(),
            bigtiff = header.is_bigtiff,
            "Opened TIFF"
        );

        Ok(Self {
            reader,
            header,
            pages,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn values(&self) -> ValueReader<'_, R> {
        ValueReader::new(&self.reader, &self.header)
    }

    fn page(&self, page: usize) -> Result<&Ifd, TiffError> {
        self.pages.get(page).ok_or(TiffError::PageOutOfRange {
            page,
            pages: self.pages.len(),
        })
    }

    /// Offsets of the reduced-resolution IFDs attached to a page.
    pub fn sub_ifd_offsets(&self, page: usize) -> Result<Vec<u64>, TiffError> {
        match self.page(page)?.get_entry_by_tag(TiffTag::SubIfds) {
            Some(entry) => self.values().read_u64_array(entry),
            None => Ok(Vec::new()),
        }
    }

    /// Number of resolution levels of a page, the full resolution included.
    pub fn level_count(&self, page: usize) -> Result<usize, TiffError> {
        Ok(1 + self.sub_ifd_offsets(page)?.len())
    }

    fn level_ifd(&self, page: usize, level: usize) -> Result<Ifd, TiffError> {
        if level == 0 {
            return Ok(self.page(page)?.clone());
        }
        let subs = self.sub_ifd_offsets(page)?;
        let offset = subs.get(level - 1).ok_or(TiffError::LevelOutOfRange {
            level,
            levels: subs.len() + 1,
        })?;
        Ifd::read(&self.reader, &self.header, *offset)
    }

    /// ImageDescription of a page, if present.
    pub fn description(&self, page: usize) -> Result<Option<String>, TiffError> {
        match self.page(page)?.get_entry_by_tag(TiffTag::ImageDescription) {
            Some(entry) => Ok(Some(self.values().read_string(entry)?)),
            None => Ok(None),
        }
    }

    /// Decoding parameters of a page level.
    pub fn layout(&self, page: usize, level: usize) -> Result<ImageLayout, TiffError> {
        let ifd = self.level_ifd(page, level)?;
        self.parse_layout(&ifd)
    }

    fn parse_layout(&self, ifd: &Ifd) -> Result<ImageLayout, TiffError> {
        let values = self.values();
        let required = |tag: TiffTag, name: &'static str| {
            ifd.get_entry_by_tag(tag).ok_or(TiffError::MissingTag(name))
        };
        let optional_u32 = |tag: TiffTag, default: u32| -> Result<u32, TiffError> {
            match ifd.get_entry_by_tag(tag) {
                Some(entry) => values.read_u32(entry),
                None => Ok(default),
            }
        };

        let width = values.read_u32(required(TiffTag::ImageWidth, "ImageWidth")?)?;
        let height = values.read_u32(required(TiffTag::ImageLength, "ImageLength")?)?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty image {width}x{height}"),
            });
        }

        let samples_per_pixel = optional_u32(TiffTag::SamplesPerPixel, 1)? as u16;

        let bits = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => values.read_u32_array(entry)?,
            None => vec![1],
        };
        let bits_per_sample = bits.first().copied().unwrap_or(1) as u16;
        if bits.iter().any(|&b| b as u16 != bits_per_sample) {
            return Err(TiffError::UnsupportedLayout(format!(
                "mixed bits per sample {bits:?}"
            )));
        }

        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => {
                let raw = values.read_u32_array(entry)?;
                let code = raw.first().copied().unwrap_or(1) as u16;
                SampleFormat::from_u16(code).ok_or_else(|| {
                    TiffError::UnsupportedLayout(format!("sample format {code}"))
                })?
            }
            None => SampleFormat::Uint,
        };
        check_sample_layout(bits_per_sample, sample_format)?;

        let code = ifd.compression(self.header.byte_order);
        let compression = Compression::from_u16(code)
            .ok_or_else(|| TiffError::UnsupportedCompression(format!("code {code}")))?;
        if !compression.is_supported() {
            return Err(TiffError::UnsupportedCompression(
                compression.name().to_string(),
            ));
        }

        let predictor = optional_u32(TiffTag::Predictor, PREDICTOR_NONE as u32)? as u16;
        if predictor != PREDICTOR_NONE && predictor != PREDICTOR_HORIZONTAL {
            return Err(TiffError::UnsupportedLayout(format!("predictor {predictor}")));
        }

        let planar_separate =
            optional_u32(TiffTag::PlanarConfiguration, 1)? as u16 == PLANAR_SEPARATE;

        let (segmentation, offsets, byte_counts) = if ifd.is_tiled() {
            let tile_width = values.read_u32(required(TiffTag::TileWidth, "TileWidth")?)?;
            let tile_height = values.read_u32(required(TiffTag::TileLength, "TileLength")?)?;
            if tile_width == 0 || tile_height == 0 {
                return Err(TiffError::InvalidTagValue {
                    tag: "TileWidth",
                    message: "zero tile dimension".to_string(),
                });
            }
            (
                Segmentation::Tiled {
                    tile_width,
                    tile_height,
                },
                values.read_u64_array(required(TiffTag::TileOffsets, "TileOffsets")?)?,
                values.read_u64_array(required(TiffTag::TileByteCounts, "TileByteCounts")?)?,
            )
        } else {
            let rows_per_strip = optional_u32(TiffTag::RowsPerStrip, height)?.clamp(1, height);
            (
                Segmentation::Striped { rows_per_strip },
                values.read_u64_array(required(TiffTag::StripOffsets, "StripOffsets")?)?,
                values.read_u64_array(required(TiffTag::StripByteCounts, "StripByteCounts")?)?,
            )
        };

        let layout = ImageLayout {
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            compression,
            predictor,
            planar_separate,
            segmentation,
            offsets,
            byte_counts,
        };

        let (_, _, across, down) = layout.grid();
        let expected = (across * down * layout.planes()) as usize;
        if layout.offsets.len() < expected || layout.byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {} segments, got {} offsets and {} byte counts",
                    expected,
                    layout.offsets.len(),
                    layout.byte_counts.len()
                ),
            });
        }

        Ok(layout)
    }

    /// Decode the full-resolution pixels of a page.
    pub fn read_page(&self, page: usize) -> Result<Raster, TiffError> {
        self.read_level(page, 0)
    }

    /// Decode every segment of a page level into one raster.
    pub fn read_level(&self, page: usize, level: usize) -> Result<Raster, TiffError> {
        let layout = self.layout(page, level)?;
        let (seg_w, seg_h, across, down) = layout.grid();
        let mut raster = Raster::blank(
            layout.width,
            layout.height,
            layout.samples_per_pixel,
            layout.bits_per_sample,
            layout.sample_format,
        )?;

        for plane in 0..layout.planes() {
            for ty in 0..down {
                for tx in 0..across {
                    let index = (plane * across * down + ty * across + tx) as usize;
                    let rows = seg_h.min(layout.height - ty * seg_h);
                    let segment = self.decode_segment(&layout, index, seg_w, rows)?;
                    blit(
                        &mut raster,
                        &layout,
                        &segment,
                        tx * seg_w,
                        ty * seg_h,
                        seg_w,
                        rows,
                        plane,
                    );
                }
            }
        }
        Ok(raster)
    }

    /// Decode one full tile of a tiled page level.
    ///
    /// Tiles are indexed row-major; edge tiles keep their padding.
    pub fn read_tile(&self, page: usize, level: usize, index: u32) -> Result<Raster, TiffError> {
        let layout = self.layout(page, level)?;
        let tiles = layout.tile_count().ok_or_else(|| {
            TiffError::UnsupportedLayout("image is striped, not tiled".to_string())
        })?;
        if index >= tiles {
            return Err(TiffError::TileOutOfRange { index, tiles });
        }

        let (tile_w, tile_h, _, _) = layout.grid();
        let mut raster = Raster::blank(
            tile_w,
            tile_h,
            layout.samples_per_pixel,
            layout.bits_per_sample,
            layout.sample_format,
        )?;
        for plane in 0..layout.planes() {
            let segment =
                self.decode_segment(&layout, (plane * tiles + index) as usize, tile_w, tile_h)?;
            blit(&mut raster, &layout, &segment, 0, 0, tile_w, tile_h, plane);
        }
        Ok(raster)
    }

    /// Read, decompress and normalize one segment to little-endian samples.
    fn decode_segment(
        &self,
        layout: &ImageLayout,
        index: usize,
        seg_w: u32,
        rows: u32,
    ) -> Result<Vec<u8>, TiffError> {
        let bytes_per_sample = layout.bits_per_sample as usize / 8;
        let spp = layout.samples_per_segment_pixel();
        let row_bytes = seg_w as usize * spp * bytes_per_sample;
        let needed = row_bytes * rows as usize;

        let offset = layout.offsets[index];
        let count = layout.byte_counts[index] as usize;
        let raw = self.reader.read_exact_at(offset, count)?;
        let mut data = decompress(layout.compression, &raw, needed)?;

        if data.len() < needed {
            return Err(TiffError::Decompression(format!(
                "segment {index} holds {} bytes, expected {needed}",
                data.len()
            )));
        }
        data.truncate(needed);

        if layout.predictor == PREDICTOR_HORIZONTAL {
            undo_horizontal_predictor(
                &mut data,
                seg_w as usize * spp,
                spp,
                bytes_per_sample,
                self.header.byte_order,
            )?;
        }

        if self.header.byte_order == ByteOrder::BigEndian && bytes_per_sample > 1 {
            for sample in data.chunks_exact_mut(bytes_per_sample) {
                sample.reverse();
            }
        }
        Ok(data)
    }
}

/// Copy a decoded segment into `dst` at (`x0`, `y0`), clipping to `dst`.
#[allow(clippy::too_many_arguments)]
fn blit(
    dst: &mut Raster,
    layout: &ImageLayout,
    segment: &[u8],
    x0: u32,
    y0: u32,
    seg_w: u32,
    rows: u32,
    plane: u32,
) {
    let bps = dst.bytes_per_sample();
    let dst_bpp = dst.bytes_per_pixel();
    let dst_row = dst.row_bytes();
    let seg_spp = layout.samples_per_segment_pixel();
    let seg_row = seg_w as usize * seg_spp * bps;

    let cols = seg_w.min(dst.width.saturating_sub(x0)) as usize;
    let rows = rows.min(dst.height.saturating_sub(y0)) as usize;

    for row in 0..rows {
        let src_start = row * seg_row;
        let dst_start = (y0 as usize + row) * dst_row + x0 as usize * dst_bpp;
        if layout.planar_separate {
            for col in 0..cols {
                let s = src_start + col * bps;
                let d = dst_start + col * dst_bpp + plane as usize * bps;
                dst.data[d..d + bps].copy_from_slice(&segment[s..s + bps]);
            }
        } else {
            let len = cols * dst_bpp;
            dst.data[dst_start..dst_start + len]
                .copy_from_slice(&segment[src_start..src_start + len]);
        }
    }
}
