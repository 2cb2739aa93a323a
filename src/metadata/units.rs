//! Dimensioned quantities for physical sizes, wavelengths and time steps.
//!
//! The bridge reports a number and a unit symbol side by side (for example
//! `PhysicalSizeX = 0.25`, `PhysicalSizeXUnit = "µm"`). The shared
//! [`UNIT_REGISTRY`] resolves the symbol; [`Quantity`] carries the pair and
//! converts between units of the same dimension.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};

use crate::error::MetadataError;

/// Physical dimension of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Length,
    Time,
    Frequency,
}

/// Units the bridge emits for lengths, times and frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Meter,
    Centimeter,
    Millimeter,
    Micrometer,
    Nanometer,
    Picometer,
    Angstrom,
    Inch,
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
    Hertz,
    Kilohertz,
    Megahertz,
}

impl Unit {
    pub fn dimension(self) -> Dimension {
        match self {
            Unit::Meter
            | Unit::Centimeter
            | Unit::Millimeter
            | Unit::Micrometer
            | Unit::Nanometer
            | Unit::Picometer
            | Unit::Angstrom
            | Unit::Inch => Dimension::Length,
            Unit::Hour
            | Unit::Minute
            | Unit::Second
            | Unit::Millisecond
            | Unit::Microsecond
            | Unit::Nanosecond => Dimension::Time,
            Unit::Hertz | Unit::Kilohertz | Unit::Megahertz => Dimension::Frequency,
        }
    }

    /// Size of one unit in the SI base unit of its dimension.
    pub fn to_base(self) -> f64 {
        match self {
            Unit::Meter => 1.0,
            Unit::Centimeter => 1e-2,
            Unit::Millimeter => 1e-3,
            Unit::Micrometer => 1e-6,
            Unit::Nanometer => 1e-9,
            Unit::Picometer => 1e-12,
            Unit::Angstrom => 1e-10,
            Unit::Inch => 0.0254,
            Unit::Hour => 3600.0,
            Unit::Minute => 60.0,
            Unit::Second => 1.0,
            Unit::Millisecond => 1e-3,
            Unit::Microsecond => 1e-6,
            Unit::Nanosecond => 1e-9,
            Unit::Hertz => 1.0,
            Unit::Kilohertz => 1e3,
            Unit::Megahertz => 1e6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Meter => "m",
            Unit::Centimeter => "cm",
            Unit::Millimeter => "mm",
            Unit::Micrometer => "µm",
            Unit::Nanometer => "nm",
            Unit::Picometer => "pm",
            Unit::Angstrom => "Å",
            Unit::Inch => "in",
            Unit::Hour => "h",
            Unit::Minute => "min",
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Microsecond => "µs",
            Unit::Nanosecond => "ns",
            Unit::Hertz => "Hz",
            Unit::Kilohertz => "kHz",
            Unit::Megahertz => "MHz",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

/// Lookup table from unit strings to [`Unit`].
///
/// Symbols are matched exactly (`ms` and `Ms` differ); spelled-out names
/// are matched case-insensitively.
pub struct UnitRegistry {
    symbols: HashMap<&'static str, Unit>,
    names: HashMap<&'static str, Unit>,
}

impl UnitRegistry {
    fn new() -> Self {
        let symbols = HashMap::from([
            ("m", Unit::Meter),
            ("cm", Unit::Centimeter),
            ("mm", Unit::Millimeter),
            ("µm", Unit::Micrometer),
            // U+03BC GREEK SMALL LETTER MU, next to the micro sign above
            ("μm", Unit::Micrometer),
            ("um", Unit::Micrometer),
            ("nm", Unit::Nanometer),
            ("pm", Unit::Picometer),
            ("Å", Unit::Angstrom),
            ("in", Unit::Inch),
            ("h", Unit::Hour),
            ("min", Unit::Minute),
            ("s", Unit::Second),
            ("ms", Unit::Millisecond),
            ("µs", Unit::Microsecond),
            ("μs", Unit::Microsecond),
            ("us", Unit::Microsecond),
            ("ns", Unit::Nanosecond),
            ("Hz", Unit::Hertz),
            ("kHz", Unit::Kilohertz),
            ("MHz", Unit::Megahertz),
        ]);
        let names = HashMap::from([
            ("meter", Unit::Meter),
            ("centimeter", Unit::Centimeter),
            ("millimeter", Unit::Millimeter),
            ("micrometer", Unit::Micrometer),
            ("micron", Unit::Micrometer),
            ("nanometer", Unit::Nanometer),
            ("picometer", Unit::Picometer),
            ("angstrom", Unit::Angstrom),
            ("inch", Unit::Inch),
            ("hour", Unit::Hour),
            ("minute", Unit::Minute),
            ("second", Unit::Second),
            ("millisecond", Unit::Millisecond),
            ("microsecond", Unit::Microsecond),
            ("nanosecond", Unit::Nanosecond),
            ("hertz", Unit::Hertz),
            ("kilohertz", Unit::Kilohertz),
            ("megahertz", Unit::Megahertz),
        ]);
        Self { symbols, names }
    }

    /// Resolve a unit string.
    pub fn parse(&self, unit: &str) -> Result<Unit, MetadataError> {
        let trimmed = unit.trim();
        if let Some(unit) = self.symbols.get(trimmed) {
            return Ok(*unit);
        }

        let lower = trimmed.to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        self.names
            .get(lower.as_str())
            .or_else(|| self.names.get(singular))
            .copied()
            .ok_or_else(|| MetadataError::UnknownUnit(unit.to_string()))
    }

    /// Build `value × unit`.
    pub fn quantity(&self, value: f64, unit: &str) -> Result<Quantity, MetadataError> {
        Ok(Quantity::new(value, self.parse(unit)?))
    }
}

/// Registry shared by every mapper call.
pub static UNIT_REGISTRY: Lazy<UnitRegistry> = Lazy::new(UnitRegistry::new);

/// A value with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Convert to `unit`, or `None` across dimensions.
    pub fn to(&self, unit: Unit) -> Option<Quantity> {
        if self.unit.dimension() != unit.dimension() {
            return None;
        }
        Some(Quantity::new(
            self.value * self.unit.to_base() / unit.to_base(),
            unit,
        ))
    }

    pub fn dimension(&self) -> Dimension {
        self.unit.dimension()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
