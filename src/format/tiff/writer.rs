//! Tiled BigTIFF writer.
//!
//! Output is always little-endian BigTIFF. Each page is one top-level IFD;
//! reduced resolutions of a page go into SubIFDs referenced by the page's
//! SubIFDs tag. Tile data and out-of-line tag values are written before the
//! IFD that points at them, so the file is produced in a single forward pass
//! except for patching the previous page's next-IFD pointer.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::convert::raster::Raster;
use crate::error::TiffError;

use super::compression::compress;
use super::parser::VERSION_BIGTIFF;
use super::tags::{
    Compression, FieldType, SampleFormat, TiffTag, PHOTOMETRIC_MIN_IS_BLACK, PHOTOMETRIC_RGB,
    PLANAR_CHUNKY, SUBFILE_REDUCED_IMAGE,
};

/// Offset of the first-IFD pointer in a BigTIFF header.
const FIRST_IFD_POINTER: u64 = 8;

/// Tiling parameters of a derived file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileOptions {
    pub tile_size: u32,
    pub compression: Compression,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            tile_size: 256,
            compression: Compression::Lzw,
        }
    }
}

/// One IFD under construction: tag → (type, count, little-endian payload).
#[derive(Debug, Default)]
struct IfdBuilder {
    entries: BTreeMap<u16, (FieldType, u64, Vec<u8>)>,
}

impl IfdBuilder {
    fn shorts(&mut self, tag: TiffTag, values: &[u16]) {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries
            .insert(tag.as_u16(), (FieldType::Short, values.len() as u64, data));
    }

    fn long(&mut self, tag: TiffTag, value: u32) {
        self.entries
            .insert(tag.as_u16(), (FieldType::Long, 1, value.to_le_bytes().to_vec()));
    }

    fn long8s(&mut self, tag: TiffTag, field_type: FieldType, values: &[u64]) {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries
            .insert(tag.as_u16(), (field_type, values.len() as u64, data));
    }

    fn ascii(&mut self, tag: TiffTag, text: &str) {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        self.entries
            .insert(tag.as_u16(), (FieldType::Ascii, data.len() as u64, data));
    }
}

/// Streaming writer of tiled, pyramidal BigTIFF files.
pub struct TiffWriter<W: Write + Seek> {
    inner: W,
    options: TileOptions,
    /// Where the pointer to the next top-level IFD must be patched
    next_pointer: u64,
    pages: usize,
}

impl TiffWriter<BufWriter<File>> {
    /// Create (or truncate) a file and write the BigTIFF header.
    pub fn create(path: impl AsRef<Path>, options: TileOptions) -> Result<Self, TiffError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), options)
    }
}

impl<W: Write + Seek> TiffWriter<W> {
    pub fn new(mut inner: W, options: TileOptions) -> Result<Self, TiffError> {
        if options.tile_size == 0 || options.tile_size % 16 != 0 {
            return Err(TiffError::UnsupportedLayout(format!(
                "tile size {} is not a positive multiple of 16",
                options.tile_size
            )));
        }
        if !options.compression.is_supported() {
            return Err(TiffError::UnsupportedCompression(
                options.compression.name().to_string(),
            ));
        }

        inner.write_all(b"II")?;
        inner.write_all(&VERSION_BIGTIFF.to_le_bytes())?;
        inner.write_all(&8u16.to_le_bytes())?;
        inner.write_all(&0u16.to_le_bytes())?;
        inner.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            inner,
            options,
            next_pointer: FIRST_IFD_POINTER,
            pages: 0,
        })
    }

    pub fn pages_written(&self) -> usize {
        self.pages
    }

    /// Append one page.
    ///
    /// `levels[0]` is the full-resolution image; further entries become
    /// SubIFDs in the given order. `description` is stored on the page IFD
    /// only.
    pub fn write_page(
        &mut self,
        levels: &[Raster],
        description: Option<&str>,
    ) -> Result<(), TiffError> {
        self.write_levels(levels, description).map(|_| ())
    }

    /// Append one page whose levels are produced on demand.
    ///
    /// Each level's tiles are written as soon as the iterator yields it and
    /// the level is dropped before the next one is requested. The page IFD
    /// follows its SubIFDs. Returns the number of levels written.
    pub fn write_levels<I>(
        &mut self,
        levels: I,
        description: Option<&str>,
    ) -> Result<usize, TiffError>
    where
        I: IntoIterator,
        I::Item: Borrow<Raster>,
    {
        let mut levels = levels.into_iter();
        let full = levels.next().ok_or_else(|| {
            TiffError::UnsupportedLayout("page without image data".to_string())
        })?;
        let (width, height) = (full.borrow().width, full.borrow().height);
        let mut ifd = self.image_ifd(full.borrow(), false)?;
        drop(full);

        let mut sub_ifds = Vec::new();
        for level in levels {
            let mut reduced = self.image_ifd(level.borrow(), true)?;
            reduced.long(TiffTag::NewSubfileType, SUBFILE_REDUCED_IMAGE);
            let (offset, _) = self.write_ifd(&reduced)?;
            sub_ifds.push(offset);
        }

        if let Some(text) = description {
            ifd.ascii(TiffTag::ImageDescription, text);
        }
        if !sub_ifds.is_empty() {
            ifd.long8s(TiffTag::SubIfds, FieldType::Ifd8, &sub_ifds);
        }
        let (offset, next_pointer) = self.write_ifd(&ifd)?;

        self.patch_u64(self.next_pointer, offset)?;
        self.next_pointer = next_pointer;
        self.pages += 1;

        let written = sub_ifds.len() + 1;
        debug!(
            page = self.pages - 1,
            width,
            height,
            levels = written,
            "Wrote TIFF page"
        );
        Ok(written)
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W, TiffError> {
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Write the tiles of `raster` and describe them in a new IFD builder.
    fn image_ifd(&mut self, raster: &Raster, reduced: bool) -> Result<IfdBuilder, TiffError> {
        let tile = self.options.tile_size;
        let across = raster.width.div_ceil(tile);
        let down = raster.height.div_ceil(tile);

        let mut offsets = Vec::with_capacity((across * down) as usize);
        let mut counts = Vec::with_capacity((across * down) as usize);
        for ty in 0..down {
            for tx in 0..across {
                let window = raster.window(tx * tile, ty * tile, tile, tile);
                let packed = compress(self.options.compression, &window.data)?;
                offsets.push(self.position()?);
                counts.push(packed.len() as u64);
                self.inner.write_all(&packed)?;
            }
        }

        let spp = raster.samples_per_pixel;
        let rgb = raster.sample_format == SampleFormat::Uint
            && raster.bits_per_sample == 8
            && (spp == 3 || spp == 4);
        let color_samples = if rgb { 3 } else { 1 };

        let mut ifd = IfdBuilder::default();
        if !reduced {
            ifd.long(TiffTag::NewSubfileType, 0);
        }
        ifd.long(TiffTag::ImageWidth, raster.width);
        ifd.long(TiffTag::ImageLength, raster.height);
        ifd.shorts(
            TiffTag::BitsPerSample,
            &vec![raster.bits_per_sample; spp as usize],
        );
        ifd.shorts(TiffTag::Compression, &[self.options.compression.as_u16()]);
        ifd.shorts(
            TiffTag::PhotometricInterpretation,
            &[if rgb {
                PHOTOMETRIC_RGB
            } else {
                PHOTOMETRIC_MIN_IS_BLACK
            }],
        );
        ifd.shorts(TiffTag::SamplesPerPixel, &[spp]);
        ifd.shorts(TiffTag::PlanarConfiguration, &[PLANAR_CHUNKY]);
        ifd.ascii(
            TiffTag::Software,
            concat!("bioformats-bridge ", env!("CARGO_PKG_VERSION")),
        );
        ifd.long(TiffTag::TileWidth, tile);
        ifd.long(TiffTag::TileLength, tile);
        ifd.long8s(TiffTag::TileOffsets, FieldType::Long8, &offsets);
        ifd.long8s(TiffTag::TileByteCounts, FieldType::Long8, &counts);
        if spp > color_samples {
            ifd.shorts(
                TiffTag::ExtraSamples,
                &vec![0u16; (spp - color_samples) as usize],
            );
        }
        ifd.shorts(
            TiffTag::SampleFormat,
            &vec![raster.sample_format as u16; spp as usize],
        );
        Ok(ifd)
    }

    /// Write out-of-line values then the IFD itself.
    ///
    /// Returns the IFD offset and the offset of its next-IFD field.
    fn write_ifd(&mut self, ifd: &IfdBuilder) -> Result<(u64, u64), TiffError> {
        let mut external = BTreeMap::new();
        for (tag, (_, _, data)) in &ifd.entries {
            if data.len() > 8 {
                self.align()?;
                external.insert(*tag, self.position()?);
                self.inner.write_all(data)?;
            }
        }

        self.align()?;
        let ifd_offset = self.position()?;
        self.inner
            .write_all(&(ifd.entries.len() as u64).to_le_bytes())?;
        for (tag, (field_type, count, data)) in &ifd.entries {
            self.inner.write_all(&tag.to_le_bytes())?;
            self.inner.write_all(&(*field_type as u16).to_le_bytes())?;
            self.inner.write_all(&count.to_le_bytes())?;
            let mut value = [0u8; 8];
            match external.get(tag) {
                Some(offset) => value.copy_from_slice(&offset.to_le_bytes()),
                None => value[..data.len()].copy_from_slice(data),
            }
            self.inner.write_all(&value)?;
        }
        let next_pointer = self.position()?;
        self.inner.write_all(&0u64.to_le_bytes())?;

        Ok((ifd_offset, next_pointer))
    }

    fn position(&mut self) -> Result<u64, TiffError> {
        Ok(self.inner.stream_position()?)
    }

    /// Pad to an even offset, as TIFF requires for IFDs and values.
    fn align(&mut self) -> Result<(), TiffError> {
        if self.position()? % 2 == 1 {
            self.inner.write_all(&[0])?;
        }
        Ok(())
    }

    fn patch_u64(&mut self, at: u64, value: u64) -> Result<(), TiffError> {
        self.inner.seek(SeekFrom::Start(at))?;
        self.inner.write_all(&value.to_le_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::format::tiff::TiffPages;
    use crate::io::MemoryRangeReader;

    fn ramp(width: u32, height: u32) -> Raster {
        let data = (0..width * height).map(|i| (i % 256) as u8).collect();
        Raster::new(width, height, 1, 8, SampleFormat::Uint, data).unwrap()
    }

    fn reopen(bytes: Vec<u8>) -> TiffPages<MemoryRangeReader> {
        TiffPages::from_reader(MemoryRangeReader::new(bytes, "mem://written")).unwrap()
    }

    #[test]
    fn test_rejects_bad_options() {
        let bad_tile = TileOptions {
            tile_size: 100,
            compression: Compression::Lzw,
        };
        assert!(TiffWriter::new(Cursor::new(Vec::new()), bad_tile).is_err());

        let jpeg = TileOptions {
            tile_size: 256,
            compression: Compression::Jpeg,
        };
        assert!(matches!(
            TiffWriter::new(Cursor::new(Vec::new()), jpeg),
            Err(TiffError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_write_pages_with_sub_ifds() {
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), TileOptions::default()).unwrap();
        let full = ramp(300, 280);
        let half = full.downsample_mean();
        writer
            .write_page(&[full.clone(), half.clone()], Some("<OME/>"))
            .unwrap();
        writer.write_page(&[ramp(10, 10)], Some("<OME/>")).unwrap();
        assert_eq!(writer.pages_written(), 2);
        let bytes = writer.finish().unwrap().into_inner();

        let pages = reopen(bytes);
        assert!(pages.header().is_bigtiff);
        assert_eq!(pages.page_count(), 2);
        assert_eq!(pages.level_count(0).unwrap(), 2);
        assert_eq!(pages.level_count(1).unwrap(), 1);
        assert_eq!(pages.description(0).unwrap().as_deref(), Some("<OME/>"));
        assert_eq!(pages.description(1).unwrap().as_deref(), Some("<OME/>"));

        assert_eq!(pages.read_page(0).unwrap(), full);
        assert_eq!(pages.read_level(0, 1).unwrap(), half);

        let layout = pages.layout(0, 0).unwrap();
        assert_eq!(layout.tile_count(), Some(4));
        assert_eq!(layout.compression, Compression::Lzw);
    }

    #[test]
    fn test_write_levels_from_iterator() {
        let full = ramp(300, 280);
        let half = full.downsample_mean();
        let quarter = half.downsample_mean();
        let owned = vec![full.clone(), half.clone(), quarter.clone()];

        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), TileOptions::default()).unwrap();
        assert_eq!(writer.write_levels(owned, Some("<OME/>")).unwrap(), 3);
        assert_eq!(writer.write_levels(std::iter::once(ramp(8, 8)), None).unwrap(), 1);
        let pages = reopen(writer.finish().unwrap().into_inner());

        assert_eq!(pages.page_count(), 2);
        assert_eq!(pages.level_count(0).unwrap(), 3);
        assert_eq!(pages.read_page(0).unwrap(), full);
        assert_eq!(pages.read_level(0, 1).unwrap(), half);
        assert_eq!(pages.read_level(0, 2).unwrap(), quarter);
        assert_eq!(pages.description(1).unwrap(), None);
    }

    #[test]
    fn test_edge_tile_is_full_size() {
        let mut writer = TiffWriter::new(
            Cursor::new(Vec::new()),
            TileOptions {
                tile_size: 16,
                compression: Compression::Deflate,
            },
        )
        .unwrap();
        writer.write_page(&[ramp(20, 20)], None).unwrap();
        let pages = reopen(writer.finish().unwrap().into_inner());

        let tile = pages.read_tile(0, 0, 3).unwrap();
        assert_eq!((tile.width, tile.height), (16, 16));
        // Pixel (16, 16) of the image is (0, 0) of the last tile
        assert_eq!(tile.sample_f64(0, 0, 0), ((16 * 20 + 16) % 256) as f64);
        // Padding beyond the image edge
        assert_eq!(tile.sample_f64(5, 5, 0), 0.0);
        assert!(matches!(
            pages.read_tile(0, 0, 4),
            Err(TiffError::TileOutOfRange { index: 4, tiles: 4 })
        ));
    }

    #[test]
    fn test_rgb_u16_round_trip() {
        let data: Vec<u8> = (0..8u16 * 8 * 3).flat_map(|v| (v * 100).to_le_bytes()).collect();
        let raster = Raster::new(8, 8, 3, 16, SampleFormat::Uint, data).unwrap();
        let mut writer = TiffWriter::new(
            Cursor::new(Vec::new()),
            TileOptions {
                tile_size: 16,
                compression: Compression::None,
            },
        )
        .unwrap();
        writer.write_page(&[raster.clone()], None).unwrap();
        let pages = reopen(writer.finish().unwrap().into_inner());
        assert_eq!(pages.read_page(0).unwrap(), raster);
    }

    #[test]
    fn test_write_page_requires_levels() {
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), TileOptions::default()).unwrap();
        assert!(writer.write_page(&[], None).is_err());
    }
}
