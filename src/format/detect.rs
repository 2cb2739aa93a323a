//! Format detection for proprietary microscopy files.
//!
//! Detection only looks at the leading bytes of a file. Every supported
//! format is decoded by the bridge, so a match is all the plugin needs to
//! know before asking for metadata or a conversion.
//!
//! - **Zeiss CZI**: starts with `ZISRAWFILE`
//! - **Leica LIF**: `0x70` at byte 0 and `0x2A` at byte 8
//! - **Nikon ND2**: starts with `DA CE BE 0A` (modern) or `6A 50 20 20` (JPEG 2000 container)

use std::path::Path;

use serde::Serialize;

use crate::error::FormatError;
use crate::io::{FileRangeReader, RangeReader};

// =============================================================================
// ImageFormat
// =============================================================================

/// Proprietary formats handed to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageFormat {
    Czi,
    Lif,
    Nd2,
}

/// One row of the format table.
#[derive(Debug, Clone, Copy)]
pub struct FormatEntry {
    pub format: ImageFormat,

    /// Human-readable name
    pub name: &'static str,

    /// Short identifier, also used as the raw metadata namespace
    pub identifier: &'static str,

    pub is_spatial: bool,

    pub need_conversion: bool,

    matcher: fn(&[u8]) -> bool,
}

impl FormatEntry {
    /// Whether `signature` (the leading bytes of a file) belongs to this format.
    pub fn matches(&self, signature: &[u8]) -> bool {
        (self.matcher)(signature)
    }
}

// =============================================================================
// Signatures
// =============================================================================

const CZI_SIGNATURE: &[u8] = b"ZISRAWFILE";

fn is_czi(buf: &[u8]) -> bool {
    buf.len() > CZI_SIGNATURE.len() && buf.starts_with(CZI_SIGNATURE)
}

fn is_lif(buf: &[u8]) -> bool {
    buf.len() > 9 && buf[0] == 0x70 && buf[8] == 0x2A
}

fn is_nd2(buf: &[u8]) -> bool {
    buf.len() > 4
        && (buf.starts_with(&[0xDA, 0xCE, 0xBE, 0x0A]) || buf.starts_with(&[0x6A, 0x50, 0x20, 0x20]))
}

/// All formats handled by the bridge plugin, checked in order.
pub static FORMATS: &[FormatEntry] = &[
    FormatEntry {
        format: ImageFormat::Czi,
        name: "Zeiss CZI",
        identifier: "CZI",
        is_spatial: true,
        need_conversion: true,
        matcher: is_czi,
    },
    FormatEntry {
        format: ImageFormat::Lif,
        name: "Leica LIF",
        identifier: "LIF",
        is_spatial: true,
        need_conversion: true,
        matcher: is_lif,
    },
    FormatEntry {
        format: ImageFormat::Nd2,
        name: "Nikon ND2",
        identifier: "ND2",
        is_spatial: true,
        need_conversion: true,
        matcher: is_nd2,
    },
];

/// Number of leading bytes read for signature checks.
pub const SIGNATURE_BYTES: usize = 32;

// =============================================================================
// Format Detection
// =============================================================================

/// Find the table entry matching a file signature.
pub fn match_signature(signature: &[u8]) -> Option<&'static FormatEntry> {
    FORMATS.iter().find(|entry| entry.matches(signature))
}

/// Look up a table entry by format.
pub fn format_entry(format: ImageFormat) -> &'static FormatEntry {
    match format {
        ImageFormat::Czi => &FORMATS[0],
        ImageFormat::Lif => &FORMATS[1],
        ImageFormat::Nd2 => &FORMATS[2],
    }
}

/// Detect the format of a local file from its leading bytes.
pub fn detect_format(path: impl AsRef<Path>) -> Result<&'static FormatEntry, FormatError> {
    let reader = FileRangeReader::open(path.as_ref())?;
    let len = reader.size().min(SIGNATURE_BYTES as u64) as usize;
    let signature = reader.read_exact_at(0, len)?;

    match_signature(&signature).ok_or_else(|| FormatError::UnsupportedFormat {
        reason: format!(
            "{} does not match any of: {}",
            reader.identifier(),
            FORMATS
                .iter()
                .map(|entry| entry.name)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_czi_signature() {
        assert!(is_czi(b"ZISRAWFILE\x00\x00"));
        // Exactly the signature, nothing after it
        assert!(!is_czi(b"ZISRAWFILE"));
        assert!(!is_czi(b"ZISRAWFILX\x00"));
    }

    #[test]
    fn test_lif_signature() {
        let mut buf = [0u8; 16];
        buf[0] = 0x70;
        buf[8] = 0x2A;
        assert!(is_lif(&buf));
        assert!(!is_lif(&buf[..9]));
        buf[8] = 0x2B;
        assert!(!is_lif(&buf));
    }

    #[test]
    fn test_nd2_signatures() {
        assert!(is_nd2(&[0xDA, 0xCE, 0xBE, 0x0A, 0x00]));
        assert!(is_nd2(&[0x6A, 0x50, 0x20, 0x20, 0x0D]));
        assert!(!is_nd2(&[0xDA, 0xCE, 0xBE, 0x0A]));
        assert!(!is_nd2(&[0x49, 0x49, 0x2A, 0x00, 0x08]));
    }

    #[test]
    fn test_match_signature_table() {
        let entry = match_signature(b"ZISRAWFILE0123456789").unwrap();
        assert_eq!(entry.format, ImageFormat::Czi);
        assert_eq!(entry.name, "Zeiss CZI");
        assert!(entry.is_spatial && entry.need_conversion);

        assert!(match_signature(b"II*\x00\x08\x00\x00\x00").is_none());
        assert!(match_signature(&[]).is_none());
    }

    #[test]
    fn test_format_entry_lookup() {
        for format in [ImageFormat::Czi, ImageFormat::Lif, ImageFormat::Nd2] {
            assert_eq!(format_entry(format).format, format);
        }
        assert_eq!(format_entry(ImageFormat::Nd2).identifier, "ND2");
    }

    #[test]
    fn test_detect_format_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xDA, 0xCE, 0xBE, 0x0A, 0, 0, 0, 0]).unwrap();
        file.flush().unwrap();
        assert_eq!(detect_format(file.path()).unwrap().format, ImageFormat::Nd2);
    }

    #[test]
    fn test_detect_format_unsupported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a microscopy file").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            detect_format(file.path()),
            Err(FormatError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format("/nonexistent/slide.czi"),
            Err(FormatError::Io(_))
        ));
    }
}
