//! TIFF header and IFD parsing.
//!
//! The intermediate file produced by the bridge may be classic TIFF or
//! BigTIFF in either byte order; derived files written by this crate are
//! always little-endian BigTIFF.
//!
//! ```text
//! Classic TIFF header (8 bytes)        BigTIFF header (16 bytes)
//!   0-1  byte order (II / MM)            0-1   byte order
//!   2-3  version 42                      2-3   version 43
//!   4-7  first IFD offset                4-5   offset size (8)
//!                                        6-7   reserved
//!                                        8-15  first IFD offset
//! ```

use crate::error::TiffError;
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
pub const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
pub const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in one IFD; anything larger is a corrupt count.
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }

    /// Encode a u16 in this byte order.
    #[inline]
    pub fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }

    /// Encode a u32 in this byte order.
    #[inline]
    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }

    /// Encode a u64 in this byte order.
    #[inline]
    pub fn write_u64(self, value: u64) -> [u8; 8] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// `bytes` must hold at least 8 bytes (16 for BigTIFF); `file_size` is
    /// used to reject a first IFD offset pointing past the end of the file.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Read and parse the header of the resource behind `reader`.
    pub fn read<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let available = reader.size().min(BIGTIFF_HEADER_SIZE as u64) as usize;
        let bytes = reader.read_exact_at(0, available)?;
        Self::parse(&bytes, reader.size())
    }

    /// Size of an IFD entry: 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry.
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Read an offset-width value (u32 classic, u64 BigTIFF).
    #[inline]
    pub fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// A single 12- or 20-byte IFD entry.
///
/// The value/offset field is kept raw; `ValueReader` resolves it against the
/// file when the value does not fit inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,

    /// Parsed field type, `None` when the type code is unknown
    pub field_type: Option<FieldType>,

    pub field_type_raw: u16,

    pub count: u64,

    /// Raw value/offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,

    /// Whether the value lives inside `value_offset_bytes`
    pub is_inline: bool,
}

impl IfdEntry {
    /// Parse an entry from its raw bytes.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let byte_order = header.byte_order;
        let tag_id = byte_order.read_u16(&bytes[0..2]);
        let field_type_raw = byte_order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_start) = if header.is_bigtiff {
            (byte_order.read_u64(&bytes[4..12]), 12)
        } else {
            (byte_order.read_u32(&bytes[4..8]) as u64, 8)
        };
        let value_offset_bytes = bytes[value_start..value_start + header.value_offset_size()].to_vec();

        // Unknown types cannot be sized; treat them as pointing elsewhere.
        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        Self {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    /// The known tag for this entry, if any.
    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.tag_id)
    }

    /// Total byte size of the value, `None` for unknown field types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|ft| ft.size_in_bytes() as u64 * self.count)
    }

    /// Interpret the value/offset field as a file offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Single inline Short/Long value, if this entry holds one.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Byte => Some(self.value_offset_bytes[0] as u32),
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long | FieldType::Ifd => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }

    /// Single inline integer value widened to u64, if this entry holds one.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if let Some(value) = self.inline_u32(byte_order) {
            return Some(value as u64);
        }
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Long8 | FieldType::Ifd8 => {
                Some(byte_order.read_u64(&self.value_offset_bytes))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ifd {
    /// File offset this IFD was read from
    pub offset: u64,

    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD in the chain, 0 for the last one
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// An IFD without entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total byte size of an IFD holding `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from bytes that start at its entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = Self::entry_count(bytes, header);
        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let entries = (0..entry_count as usize)
            .map(|i| {
                let start = count_size + i * entry_size;
                IfdEntry::parse(&bytes[start..start + entry_size], header)
            })
            .collect();

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = header.read_offset(&bytes[next_start..]);

        Ok(Self {
            offset: 0,
            entries,
            next_ifd_offset,
        })
    }

    /// Read the IFD located at `offset`.
    pub fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        if offset == 0 || offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader.read_exact_at(offset, header.ifd_count_size())?;
        let entry_count = Self::entry_count(&count_bytes, header);
        if entry_count == 0 || entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let ifd_bytes = reader.read_exact_at(offset, Self::calculate_size(entry_count, header))?;
        let mut ifd = Self::parse(&ifd_bytes, header)?;
        ifd.offset = offset;
        Ok(ifd)
    }

    fn entry_count(bytes: &[u8], header: &TiffHeader) -> u64 {
        if header.is_bigtiff {
            header.byte_order.read_u64(bytes)
        } else {
            header.byte_order.read_u16(bytes) as u64
        }
    }

    /// Find an entry by numeric tag ID.
    pub fn get_entry(&self, tag_id: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag_id)
    }

    /// Find an entry by known tag.
    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.get_entry(tag.as_u16())
    }

    /// Single inline integer value of a tag.
    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileLength, byte_order)
    }

    /// Compression code; TIFF defaults to 1 (none) when absent.
    pub fn compression(&self, byte_order: ByteOrder) -> u16 {
        self.get_u32(TiffTag::Compression, byte_order)
            .map(|v| v as u16)
            .unwrap_or(1)
    }

    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileOffsets).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;

    fn le_header(is_bigtiff: bool) -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff,
            first_ifd_offset: 8,
        }
    }

    /// Classic little-endian TIFF with one IFD of three entries at offset 8.
    fn classic_tiff() -> Vec<u8> {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        data.extend_from_slice(&3u16.to_le_bytes());
        // ImageWidth SHORT 1 = 672
        data.extend_from_slice(&[0x00, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0xA0, 0x02, 0x00, 0x00]);
        // ImageLength LONG 1 = 512
        data.extend_from_slice(&[0x01, 0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00]);
        // ImageDescription ASCII 12 at offset 50
        data.extend_from_slice(&[0x0E, 0x01, 0x02, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x32, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"<OME></OME>\0");
        data
    }

    #[test]
    fn test_byte_order_read_write() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(ByteOrder::LittleEndian.read_u32(&bytes), 0x04030201);
        assert_eq!(ByteOrder::BigEndian.read_u32(&bytes), 0x01020304);
        assert_eq!(ByteOrder::BigEndian.write_u32(0x01020304), bytes);
        assert_eq!(ByteOrder::LittleEndian.write_u16(0x0201), [0x01, 0x02]);
        assert_eq!(
            ByteOrder::LittleEndian.read_u64(&ByteOrder::LittleEndian.write_u64(42)),
            42
        );
    }

    #[test]
    fn test_parse_classic_header() {
        let header = TiffHeader::parse(&[0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08], 100).unwrap();
        assert_eq!(header.byte_order, ByteOrder::BigEndian);
        assert!(!header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 8);
    }

    #[test]
    fn test_parse_bigtiff_header() {
        let bytes = [
            0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0,
        ];
        let header = TiffHeader::parse(&bytes, 100).unwrap();
        assert!(header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 16);
        assert_eq!(header.ifd_entry_size(), 20);
        assert_eq!(header.ifd_count_size(), 8);
        assert_eq!(header.value_offset_size(), 8);
    }

    #[test]
    fn test_parse_header_errors() {
        assert!(matches!(
            TiffHeader::parse(&[0, 0, 0x2A, 0, 8, 0, 0, 0], 100),
            Err(TiffError::InvalidMagic(0))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0, 0, 8, 0, 0, 0], 100),
            Err(TiffError::InvalidVersion(0))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A, 0], 100),
            Err(TiffError::FileTooSmall { required: 8, actual: 4 })
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2B, 0, 4, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0], 100),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A, 0, 0xE8, 0x03, 0, 0], 500),
            Err(TiffError::InvalidIfdOffset(1000))
        ));
    }

    #[test]
    fn test_read_ifd_from_reader() {
        let reader = MemoryRangeReader::new(classic_tiff(), "mem://classic");
        let header = TiffHeader::read(&reader).unwrap();
        let ifd = Ifd::read(&reader, &header, header.first_ifd_offset).unwrap();

        assert_eq!(ifd.offset, 8);
        assert_eq!(ifd.entries.len(), 3);
        assert_eq!(ifd.next_ifd_offset, 0);
        assert_eq!(ifd.image_width(header.byte_order), Some(672));
        assert_eq!(ifd.image_height(header.byte_order), Some(512));
        assert_eq!(ifd.compression(header.byte_order), 1);
        assert!(!ifd.is_tiled());

        let description = ifd.get_entry_by_tag(TiffTag::ImageDescription).unwrap();
        assert!(!description.is_inline);
        assert_eq!(description.value_byte_size(), Some(12));
        assert_eq!(description.value_offset(header.byte_order), 50);
    }

    #[test]
    fn test_read_ifd_rejects_bad_offsets() {
        let reader = MemoryRangeReader::new(classic_tiff(), "mem://classic");
        let header = TiffHeader::read(&reader).unwrap();
        assert!(matches!(
            Ifd::read(&reader, &header, 0),
            Err(TiffError::InvalidIfdOffset(0))
        ));
        assert!(matches!(
            Ifd::read(&reader, &header, 10_000),
            Err(TiffError::InvalidIfdOffset(10_000))
        ));
    }

    #[test]
    fn test_bigtiff_entry_inline_long8() {
        let header = le_header(true);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&324u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());

        let entry = IfdEntry::parse(&bytes, &header);
        assert_eq!(entry.tag(), Some(TiffTag::TileOffsets));
        assert!(entry.is_inline);
        assert_eq!(entry.inline_u32(ByteOrder::LittleEndian), None);
        assert_eq!(entry.inline_u64(ByteOrder::LittleEndian), Some(0x1_0000_0000));
    }

    #[test]
    fn test_unknown_field_type_is_not_inline() {
        let header = le_header(false);
        let bytes = [0x00, 0x01, 0x63, 0x00, 0x01, 0, 0, 0, 0x10, 0, 0, 0];
        let entry = IfdEntry::parse(&bytes, &header);
        assert_eq!(entry.field_type, None);
        assert_eq!(entry.field_type_raw, 0x63);
        assert!(!entry.is_inline);
        assert_eq!(entry.value_byte_size(), None);
    }

    #[test]
    fn test_parse_ifd_truncated() {
        let header = le_header(false);
        let bytes = [0x02, 0x00, 0x00];
        assert!(matches!(
            Ifd::parse(&bytes, &header),
            Err(TiffError::FileTooSmall { .. })
        ));
    }
}
