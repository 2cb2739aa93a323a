//! In-place removal of page descriptions.
//!
//! OME-TIFF readers expect the OME-XML block on the first page only. The
//! derived file is written with the description on every page, so pages
//! after the first are rewritten here without their ImageDescription entry.
//! Each IFD shrinks by one entry in place; the freed slot and the orphaned
//! string bytes are zeroed.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::TiffError;
use crate::io::{FileRangeReader, RangeReader};

use super::parser::{Ifd, TiffHeader};
use super::tags::TiffTag;

/// Remove the ImageDescription of every top-level page except the first.
///
/// Returns the number of pages that were rewritten. String bytes shared
/// with the first page's description are left untouched.
pub fn strip_descriptions(path: impl AsRef<Path>) -> Result<usize, TiffError> {
    let path = path.as_ref();
    let reader = FileRangeReader::open(path)?;
    let header = TiffHeader::read(&reader)?;
    let byte_order = header.byte_order;
    let tag = TiffTag::ImageDescription.as_u16();

    let mut pages = Vec::new();
    let mut offset = header.first_ifd_offset;
    while offset != 0 {
        if pages.iter().any(|ifd: &Ifd| ifd.offset == offset) {
            break;
        }
        let ifd = Ifd::read(&reader, &header, offset)?;
        offset = ifd.next_ifd_offset;
        pages.push(ifd);
    }

    let kept = pages
        .first()
        .and_then(|ifd| ifd.get_entry(tag))
        .filter(|entry| !entry.is_inline)
        .map(|entry| entry.value_offset(byte_order));

    let mut patches: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut stripped = 0;
    for ifd in pages.iter().skip(1) {
        let Some(position) = ifd.entries.iter().position(|e| e.tag_id == tag) else {
            continue;
        };

        let count = ifd.entries.len() as u64;
        let size = Ifd::calculate_size(count, &header);
        let raw = reader.read_exact_at(ifd.offset, size)?;

        let count_size = header.ifd_count_size();
        let entry_size = header.ifd_entry_size();
        let mut rewritten = Vec::with_capacity(size);
        if header.is_bigtiff {
            rewritten.extend_from_slice(&byte_order.write_u64(count - 1));
        } else {
            rewritten.extend_from_slice(&byte_order.write_u16((count - 1) as u16));
        }
        for i in 0..count as usize {
            if i != position {
                let start = count_size + i * entry_size;
                rewritten.extend_from_slice(&raw[start..start + entry_size]);
            }
        }
        let next_start = count_size + count as usize * entry_size;
        rewritten.extend_from_slice(&raw[next_start..]);
        rewritten.resize(size, 0);
        patches.push((ifd.offset, rewritten));
        stripped += 1;

        let entry = &ifd.entries[position];
        if !entry.is_inline {
            let value_offset = entry.value_offset(byte_order);
            if Some(value_offset) != kept {
                if let Some(len) = entry.value_byte_size() {
                    patches.push((value_offset, vec![0u8; len as usize]));
                }
            }
        }
    }

    // Release the read handle before reopening for writing.
    drop(reader);

    if patches.is_empty() {
        return Ok(0);
    }

    let mut file = OpenOptions::new().write(true).open(path)?;
    for (at, bytes) in &patches {
        file.seek(SeekFrom::Start(*at))?;
        file.write_all(bytes)?;
    }
    file.flush()?;

    debug!(path = %path.display(), pages = stripped, "Stripped page descriptions");
    Ok(stripped)
}
