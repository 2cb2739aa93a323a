//! In-memory rasters and the 2×2 mean reduction used to build pyramids.
//!
//! A [`Raster`] always holds chunky (interleaved) samples in little-endian
//! byte order, whatever the layout of the file it was read from.

use crate::error::TiffError;
use crate::format::tiff::SampleFormat;

/// Pixel buffer of one image plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    /// Row-major, interleaved, little-endian samples
    pub data: Vec<u8>,
}

impl Raster {
    /// Wrap a sample buffer, checking that its length matches the geometry.
    pub fn new(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        sample_format: SampleFormat,
        data: Vec<u8>,
    ) -> Result<Self, TiffError> {
        check_sample_layout(bits_per_sample, sample_format)?;
        if samples_per_pixel == 0 {
            return Err(TiffError::UnsupportedLayout(
                "zero samples per pixel".to_string(),
            ));
        }

        let raster = Self {
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            data,
        };
        let expected = raster.expected_len();
        if raster.data.len() != expected {
            return Err(TiffError::InvalidTagValue {
                tag: "StripByteCounts",
                message: format!(
                    "raster of {}x{} needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    raster.data.len()
                ),
            });
        }
        Ok(raster)
    }

    /// A zero-filled raster with the given geometry and sample layout.
    pub fn blank(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        sample_format: SampleFormat,
    ) -> Result<Self, TiffError> {
        let len = width as usize
            * height as usize
            * samples_per_pixel as usize
            * (bits_per_sample as usize / 8);
        Self::new(
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            vec![0u8; len],
        )
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_sample() * self.samples_per_pixel as usize
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.bytes_per_pixel() * self.width as usize
    }

    fn expected_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    /// Whether the whole raster fits in a single `tile_size` square tile.
    pub fn fits_in_tile(&self, tile_size: u32) -> bool {
        self.width <= tile_size && self.height <= tile_size
    }

    /// Copy a `width`×`height` window starting at (`x`, `y`).
    ///
    /// Parts of the window outside the raster are zero-filled, which is how
    /// edge tiles are padded.
    pub fn window(&self, x: u32, y: u32, width: u32, height: u32) -> Raster {
        let bpp = self.bytes_per_pixel();
        let mut data = vec![0u8; width as usize * height as usize * bpp];

        let copy_w = self.width.saturating_sub(x).min(width) as usize;
        let copy_h = self.height.saturating_sub(y).min(height) as usize;
        let src_row = self.row_bytes();
        let dst_row = width as usize * bpp;

        for row in 0..copy_h {
            let src = (y as usize + row) * src_row + x as usize * bpp;
            let dst = row * dst_row;
            data[dst..dst + copy_w * bpp].copy_from_slice(&self.data[src..src + copy_w * bpp]);
        }

        Raster {
            width,
            height,
            samples_per_pixel: self.samples_per_pixel,
            bits_per_sample: self.bits_per_sample,
            sample_format: self.sample_format,
            data,
        }
    }

    /// Halve both dimensions by averaging 2×2 blocks.
    ///
    /// Output dimensions round up; blocks on the right and bottom edges
    /// average only the pixels that exist. Integer means are rounded to the
    /// nearest value.
    pub fn downsample_mean(&self) -> Raster {
        let data = match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Uint, 8) => mean_2x2::<u8>(self),
            (SampleFormat::Uint, 16) => mean_2x2::<u16>(self),
            (SampleFormat::Uint, 32) => mean_2x2::<u32>(self),
            (SampleFormat::Int, 8) => mean_2x2::<i8>(self),
            (SampleFormat::Int, 16) => mean_2x2::<i16>(self),
            (SampleFormat::Int, 32) => mean_2x2::<i32>(self),
            (SampleFormat::Float, 32) => mean_2x2::<f32>(self),
            (SampleFormat::Float, 64) => mean_2x2::<f64>(self),
            // Layouts are checked on construction
            _ => Vec::new(),
        };

        Raster {
            width: half(self.width),
            height: half(self.height),
            samples_per_pixel: self.samples_per_pixel,
            bits_per_sample: self.bits_per_sample,
            sample_format: self.sample_format,
            data,
        }
    }

    /// Read sample `s` of pixel (`x`, `y`) as f64.
    pub fn sample_f64(&self, x: u32, y: u32, s: u16) -> f64 {
        let offset = y as usize * self.row_bytes()
            + x as usize * self.bytes_per_pixel()
            + s as usize * self.bytes_per_sample();
        let bytes = &self.data[offset..];
        match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Uint, 8) => u8::read_le(bytes).to_f64(),
            (SampleFormat::Uint, 16) => u16::read_le(bytes).to_f64(),
            (SampleFormat::Uint, 32) => u32::read_le(bytes).to_f64(),
            (SampleFormat::Int, 8) => i8::read_le(bytes).to_f64(),
            (SampleFormat::Int, 16) => i16::read_le(bytes).to_f64(),
            (SampleFormat::Int, 32) => i32::read_le(bytes).to_f64(),
            (SampleFormat::Float, 32) => f32::read_le(bytes).to_f64(),
            (SampleFormat::Float, 64) => f64::read_le(bytes),
            _ => 0.0,
        }
    }
}

/// Ceil-divide a dimension by two, never below one.
#[inline]
pub fn half(dim: u32) -> u32 {
    dim.div_ceil(2).max(1)
}

/// Reject sample layouts the engine does not handle.
pub fn check_sample_layout(bits: u16, format: SampleFormat) -> Result<(), TiffError> {
    let ok = match format {
        SampleFormat::Uint | SampleFormat::Int => matches!(bits, 8 | 16 | 32),
        SampleFormat::Float => matches!(bits, 32 | 64),
    };
    if ok {
        Ok(())
    } else {
        Err(TiffError::UnsupportedLayout(format!(
            "{bits}-bit {format:?} samples"
        )))
    }
}

// =============================================================================
// Typed sample access
// =============================================================================

trait Sample: Copy {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
    fn to_f64(self) -> f64;
    fn from_mean(mean: f64) -> Self;
}

macro_rules! int_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }
            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_mean(mean: f64) -> Self {
                mean.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
            }
        }
    )*};
}

int_sample!(u8, u16, u32, i8, i16, i32);

impl Sample for f32 {
    const SIZE: usize = 4;
    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_mean(mean: f64) -> Self {
        mean as f32
    }
}

impl Sample for f64 {
    const SIZE: usize = 8;
    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(buf)
    }
    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn from_mean(mean: f64) -> Self {
        mean
    }
}

fn mean_2x2<S: Sample>(src: &Raster) -> Vec<u8> {
    let spp = src.samples_per_pixel as usize;
    let (w, h) = (src.width as usize, src.height as usize);
    let (out_w, out_h) = (half(src.width) as usize, half(src.height) as usize);
    let src_row = w * spp * S::SIZE;
    let dst_row = out_w * spp * S::SIZE;
    let mut out = vec![0u8; dst_row * out_h];

    for oy in 0..out_h {
        let y0 = oy * 2;
        let y1 = (y0 + 1).min(h - 1);
        for ox in 0..out_w {
            let x0 = ox * 2;
            let x1 = (x0 + 1).min(w - 1);

            // Clamped coordinates collapse on odd edges; count distinct pixels only.
            let mut coords = [(x0, y0); 4];
            let mut n = 1;
            for (x, y) in [(x1, y0), (x0, y1), (x1, y1)] {
                if !coords[..n].contains(&(x, y)) {
                    coords[n] = (x, y);
                    n += 1;
                }
            }

            for s in 0..spp {
                let sum: f64 = coords[..n]
                    .iter()
                    .map(|&(x, y)| {
                        let at = y * src_row + (x * spp + s) * S::SIZE;
                        S::read_le(&src.data[at..]).to_f64()
                    })
                    .sum();
                let at = oy * dst_row + (ox * spp + s) * S::SIZE;
                S::from_mean(sum / n as f64).write_le(&mut out[at..]);
            }
        }
    }
    out
}
