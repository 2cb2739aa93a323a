//! Image metadata value types produced by the mapper.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::MetadataError;

use super::units::Quantity;

// =============================================================================
// Pixel type
// =============================================================================

/// OME pixel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    Bit,
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float,
    Double,
    Complex,
    #[serde(rename = "double-complex")]
    DoubleComplex,
}

impl PixelType {
    /// Parse an OME pixel type name, ignoring case.
    pub fn parse(name: &str) -> Result<Self, MetadataError> {
        let pixel_type = match name.trim().to_lowercase().as_str() {
            "bit" => PixelType::Bit,
            "int8" => PixelType::Int8,
            "int16" => PixelType::Int16,
            "int32" => PixelType::Int32,
            "uint8" => PixelType::Uint8,
            "uint16" => PixelType::Uint16,
            "uint32" => PixelType::Uint32,
            "float" => PixelType::Float,
            "double" => PixelType::Double,
            "complex" => PixelType::Complex,
            "double-complex" => PixelType::DoubleComplex,
            _ => return Err(MetadataError::UnknownPixelType(name.to_string())),
        };
        Ok(pixel_type)
    }

    /// Storage width of one sample in bits.
    pub fn bits(self) -> u32 {
        match self {
            PixelType::Bit => 1,
            PixelType::Int8 | PixelType::Uint8 => 8,
            PixelType::Int16 | PixelType::Uint16 => 16,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float => 32,
            PixelType::Double | PixelType::Complex => 64,
            PixelType::DoubleComplex => 128,
        }
    }
}

// =============================================================================
// Colour
// =============================================================================

/// An RGBA channel colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Decode an OME packed colour: `0xRRGGBBAA`, often sent as a signed
    /// 32-bit integer.
    pub fn from_packed(packed: i64) -> Self {
        let [r, g, b, a] = (packed as u32).to_be_bytes();
        Self { r, g, b, a }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA`.
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.trim().strip_prefix('#')?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let a = if hex.len() == 8 { byte(6)? } else { 255 };
        Some(Self::new(byte(0)?, byte(2)?, byte(4)?, a))
    }

    /// Read a colour from a bridge value (integer or hex string).
    pub fn from_value(key: &str, value: &Value) -> Result<Self, MetadataError> {
        let invalid = || MetadataError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a packed RGBA integer or #RRGGBB[AA], got {value}"),
        };
        match value {
            Value::Number(n) => n.as_i64().map(Self::from_packed).ok_or_else(invalid),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(packed) => Ok(Self::from_packed(packed)),
                Err(_) => Self::from_hex(s).ok_or_else(invalid),
            },
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Image metadata
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageChannel {
    pub index: usize,
    pub emission_wavelength: Option<Quantity>,
    pub excitation_wavelength: Option<Quantity>,
    pub suggested_name: Option<String>,
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Objective {
    pub nominal_magnification: Option<f64>,
    pub calibrated_magnification: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Microscope {
    pub model: Option<String>,
}

/// Dimensions of a macro, thumbnail or label image stored next to the main
/// image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssociatedImage {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub n_channels: Option<u32>,
}

/// Metadata of the main image of a file.
///
/// [`map_main`](super::mapper::map_main) fills the structural part;
/// [`map_known`](super::mapper::map_known) adds acquisition details and sets
/// `is_complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,

    /// Channels as stored, each with `n_samples` samples
    pub n_concrete_channels: u32,
    pub depth: u32,
    pub duration: u32,

    pub pixel_type: PixelType,
    pub significant_bits: u32,
    pub n_samples: u32,
    pub channels: Vec<ImageChannel>,

    pub physical_size_x: Option<Quantity>,
    pub physical_size_y: Option<Quantity>,
    pub physical_size_z: Option<Quantity>,

    /// Time step between frames
    pub frame_rate: Option<Quantity>,

    pub acquisition_datetime: Option<String>,
    pub description: Option<String>,
    pub objective: Objective,
    pub microscope: Microscope,

    pub associated_macro: Option<AssociatedImage>,
    pub associated_thumb: Option<AssociatedImage>,
    pub associated_label: Option<AssociatedImage>,

    pub is_complete: bool,
}

impl ImageMetadata {
    /// Number of 2D planes: channels × depth × duration.
    pub fn n_planes(&self) -> usize {
        self.n_concrete_channels as usize * self.depth as usize * self.duration as usize
    }

    /// Number of intensity channels (concrete channels × samples).
    pub fn n_channels(&self) -> u32 {
        self.n_concrete_channels * self.n_samples
    }
}

// =============================================================================
// Pyramid
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PyramidTier {
    pub width: u32,
    pub height: u32,
    pub tile_width: Option<u32>,
    pub tile_height: Option<u32>,
}

/// Resolution tiers in the order the bridge reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pyramid {
    tiers: Vec<PyramidTier>,
}

impl Pyramid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tier(&mut self, tier: PyramidTier) {
        self.tiers.push(tier);
    }

    pub fn n_levels(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn base(&self) -> Option<&PyramidTier> {
        self.tiers.first()
    }

    pub fn tiers(&self) -> &[PyramidTier] {
        &self.tiers
    }
}

// =============================================================================
// Planes
// =============================================================================

/// Where the bridge stores one (c, z, t) plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaneInfo {
    pub bf_index: i64,
    pub bf_series: i64,
}

/// Dense (c, z, t) table of plane locations. Cells never set stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanesInfo {
    pub size_c: u32,
    pub size_z: u32,
    pub size_t: u32,
    cells: Vec<Option<PlaneInfo>>,
}

impl PlanesInfo {
    pub fn new(size_c: u32, size_z: u32, size_t: u32) -> Self {
        let len = size_c as usize * size_z as usize * size_t as usize;
        Self {
            size_c,
            size_z,
            size_t,
            cells: vec![None; len],
        }
    }

    fn index(&self, c: u32, z: u32, t: u32) -> Option<usize> {
        if c >= self.size_c || z >= self.size_z || t >= self.size_t {
            return None;
        }
        Some(
            (t as usize * self.size_z as usize + z as usize) * self.size_c as usize + c as usize,
        )
    }

    pub fn set(&mut self, c: u32, z: u32, t: u32, plane: PlaneInfo) -> Result<(), MetadataError> {
        let index = self
            .index(c, z, t)
            .ok_or(MetadataError::PlaneOutOfRange {
                c,
                z,
                t,
                size_c: self.size_c,
                size_z: self.size_z,
                size_t: self.size_t,
            })?;
        self.cells[index] = Some(plane);
        Ok(())
    }

    pub fn get(&self, c: u32, z: u32, t: u32) -> Option<PlaneInfo> {
        self.index(c, z, t).and_then(|i| self.cells[i])
    }

    /// Number of cells that were set.
    pub fn n_set(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// =============================================================================
// Raw metadata
// =============================================================================

/// Flat key/value store of a format's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetadataStore {
    entries: BTreeMap<String, Value>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, prefixed by `namespace.` when given.
    pub fn set(&mut self, key: &str, value: Value, namespace: Option<&str>) {
        let key = match namespace {
            Some(ns) => format!("{ns}.{key}"),
            None => key.to_string(),
        };
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
