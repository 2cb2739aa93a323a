//! Segment codecs for tiles and strips.
//!
//! LZW uses the TIFF flavour (MSB bit order, early code-size switch) via
//! `weezl`; Deflate and Adobe Deflate are zlib streams handled by `flate2`.

use std::io::{Read, Write};

use weezl::BitOrder;

use crate::error::TiffError;

use super::parser::ByteOrder;
use super::tags::Compression;

/// Decompress one segment.
///
/// `expected_len` is only a capacity hint; callers check the final length.
pub fn decompress(
    compression: Compression,
    data: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, TiffError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Lzw => {
            let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(BitOrder::Msb, 8);
            let mut out = Vec::with_capacity(expected_len);
            // Some writers omit the end-of-information code, so a stream that
            // simply runs out is accepted.
            let result = decoder.into_vec(&mut out).decode(data);
            result
                .status
                .map_err(|e| TiffError::Decompression(format!("LZW: {e}")))?;
            Ok(out)
        }
        Compression::Deflate | Compression::AdobeDeflate => {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TiffError::Decompression(format!("Deflate: {e}")))?;
            Ok(out)
        }
        other => Err(TiffError::UnsupportedCompression(other.name().to_string())),
    }
}

/// Compress one segment.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, TiffError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Lzw => weezl::encode::Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(data)
            .map_err(|e| TiffError::Compression(format!("LZW: {e}"))),
        Compression::Deflate | Compression::AdobeDeflate => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| TiffError::Compression(format!("Deflate: {e}")))
        }
        other => Err(TiffError::UnsupportedCompression(other.name().to_string())),
    }
}

/// Reverse horizontal differencing (Predictor = 2) in place.
///
/// `row_samples` is the number of samples in one row of the segment
/// (width times interleaved samples per pixel).
pub fn undo_horizontal_predictor(
    buf: &mut [u8],
    row_samples: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    byte_order: ByteOrder,
) -> Result<(), TiffError> {
    let row_bytes = row_samples * bytes_per_sample;
    if row_bytes == 0 {
        return Ok(());
    }

    for row in buf.chunks_mut(row_bytes) {
        match bytes_per_sample {
            1 => {
                for i in samples_per_pixel..row.len() {
                    row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
                }
            }
            2 => {
                let n = row.len() / 2;
                for i in samples_per_pixel..n {
                    let prev = byte_order.read_u16(&row[(i - samples_per_pixel) * 2..]);
                    let cur = byte_order.read_u16(&row[i * 2..]);
                    row[i * 2..i * 2 + 2]
                        .copy_from_slice(&byte_order.write_u16(cur.wrapping_add(prev)));
                }
            }
            other => {
                return Err(TiffError::UnsupportedLayout(format!(
                    "horizontal predictor with {} bits per sample",
                    other * 8
                )))
            }
        }
    }
    Ok(())
}
