//! Mapping of bridge `properties` responses to image metadata.
//!
//! The bridge answers with flat `Bioformats.*` keys plus three list-valued
//! keys:
//!
//! - `Bioformats.Channels`: one object per channel
//! - `Bioformats.Pyramid`: one object per resolution tier
//! - `Bioformats.Planes`: one object per (c, z, t) plane
//!
//! Numbers may arrive as JSON numbers or as numeric strings. JSON `null` is
//! treated as an absent key.

use serde_json::{Map, Value};

use crate::bridge::BridgeResponse;
use crate::error::MetadataError;

use super::model::{
    AssociatedImage, Color, ImageChannel, ImageMetadata, MetadataStore, Microscope, Objective,
    PixelType, PlaneInfo, PlanesInfo, Pyramid, PyramidTier,
};
use super::units::{Quantity, UNIT_REGISTRY};

const PIXEL_TYPE: &str = "Bioformats.Pixels.PixelType";
const BITS_PER_PIXEL: &str = "Bioformats.Pixels.BitsPerPixel";
const SIZE_X: &str = "Bioformats.Pixels.SizeX";
const SIZE_Y: &str = "Bioformats.Pixels.SizeY";
const SIZE_Z: &str = "Bioformats.Pixels.SizeZ";
const SIZE_T: &str = "Bioformats.Pixels.SizeT";
const EFFECTIVE_SIZE_C: &str = "Bioformats.Pixels.EffectiveSizeC";
const SAMPLES_PER_PIXEL: &str = "Bioformats.Pixels.SamplesPerPixel";
const CHANNELS: &str = "Bioformats.Channels";
const PYRAMID: &str = "Bioformats.Pyramid";
const PLANES: &str = "Bioformats.Planes";

/// Prefixes left out of the raw store; they are mapped structurally.
const STRUCTURED_PREFIXES: [&str; 3] = [PYRAMID, PLANES, CHANNELS];

// =============================================================================
// Value helpers
// =============================================================================

fn present<'a>(value: Option<&'a Value>) -> Option<&'a Value> {
    value.filter(|v| !v.is_null())
}

/// A float from a JSON number or numeric string.
pub fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_u32(key: &str, value: &Value) -> Result<u32, MetadataError> {
    let invalid = || MetadataError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got {value}"),
    };
    let n = match value {
        Value::Number(n) => n.as_u64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    u32::try_from(n).map_err(|_| invalid())
}

fn parse_i64(key: &str, value: &Value) -> Result<i64, MetadataError> {
    let invalid = || MetadataError::InvalidValue {
        key: key.to_string(),
        message: format!("expected an integer, got {value}"),
    };
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn optional_u32(fields: &Map<String, Value>, key: &str) -> Result<Option<u32>, MetadataError> {
    present(fields.get(key))
        .map(|v| parse_u32(key, v))
        .transpose()
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match present(value)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn response_u32(response: &BridgeResponse, key: &str) -> Result<Option<u32>, MetadataError> {
    present(response.get(key))
        .map(|v| parse_u32(key, v))
        .transpose()
}

fn required_u32(response: &BridgeResponse, key: &'static str) -> Result<u32, MetadataError> {
    response_u32(response, key)?.ok_or(MetadataError::MissingField(key))
}

/// Entries of a list-valued key; absent means empty.
fn list<'a>(response: &'a BridgeResponse, key: &str) -> Result<Vec<&'a Map<String, Value>>, MetadataError> {
    let Some(value) = present(response.get(key)) else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = value else {
        return Err(MetadataError::InvalidValue {
            key: key.to_string(),
            message: "expected a list".to_string(),
        });
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object().ok_or_else(|| MetadataError::InvalidValue {
                key: format!("{key}[{i}]"),
                message: "expected an object".to_string(),
            })
        })
        .collect()
}

/// Build a quantity from a value and a unit.
///
/// Returns `None` unless both are present and the value is a strictly
/// positive number. An unknown unit string is an error.
pub fn parse_physical_size(
    value: Option<&Value>,
    unit: Option<&Value>,
) -> Result<Option<Quantity>, MetadataError> {
    let (Some(value), Some(unit)) = (present(value), present(unit)) else {
        return Ok(None);
    };
    let Some(unit) = unit.as_str() else {
        return Ok(None);
    };
    match parse_float(value) {
        Some(v) if v > 0.0 => UNIT_REGISTRY.quantity(v, unit).map(Some),
        _ => Ok(None),
    }
}

// =============================================================================
// Main metadata
// =============================================================================

/// Map the structural part of the image metadata.
pub fn map_main(response: &BridgeResponse) -> Result<ImageMetadata, MetadataError> {
    let pixel_type = match present(response.get(PIXEL_TYPE)) {
        Some(Value::String(name)) => PixelType::parse(name)?,
        Some(other) => return Err(MetadataError::UnknownPixelType(other.to_string())),
        None => return Err(MetadataError::MissingField(PIXEL_TYPE)),
    };

    let legacy_spp = response_u32(response, SAMPLES_PER_PIXEL)?.unwrap_or(1);
    let mut n_samples = legacy_spp;
    let mut channels = Vec::new();

    for (index, channel) in list(response, CHANNELS)?.into_iter().enumerate() {
        let spp = optional_u32(channel, "SamplesPerPixel")?.unwrap_or(legacy_spp);
        if index == 0 {
            n_samples = spp;
        } else if spp != n_samples {
            return Err(MetadataError::InconsistentChannelLayout {
                channel: index,
                expected: n_samples,
                found: spp,
            });
        }

        let color = present(channel.get("Color"))
            .map(|v| Color::from_value(&format!("{CHANNELS}[{index}].Color"), v))
            .transpose()?;

        channels.push(ImageChannel {
            index,
            emission_wavelength: parse_physical_size(
                channel.get("EmissionWavelength"),
                channel.get("EmissionWavelengthUnit"),
            )?,
            excitation_wavelength: parse_physical_size(
                channel.get("ExcitationWavelength"),
                channel.get("ExcitationWavelengthUnit"),
            )?,
            suggested_name: optional_string(channel.get("SuggestedName")),
            color,
        });
    }

    Ok(ImageMetadata {
        width: required_u32(response, SIZE_X)?,
        height: required_u32(response, SIZE_Y)?,
        n_concrete_channels: response_u32(response, EFFECTIVE_SIZE_C)?.unwrap_or(1),
        depth: response_u32(response, SIZE_Z)?.unwrap_or(1),
        duration: response_u32(response, SIZE_T)?.unwrap_or(1),
        pixel_type,
        significant_bits: response_u32(response, BITS_PER_PIXEL)?.unwrap_or(pixel_type.bits()),
        n_samples,
        channels,
        physical_size_x: None,
        physical_size_y: None,
        physical_size_z: None,
        frame_rate: None,
        acquisition_datetime: None,
        description: None,
        objective: Objective::default(),
        microscope: Microscope::default(),
        associated_macro: None,
        associated_thumb: None,
        associated_label: None,
        is_complete: false,
    })
}

// =============================================================================
// Known metadata
// =============================================================================

fn physical_size(response: &BridgeResponse, key: &str) -> Result<Option<Quantity>, MetadataError> {
    parse_physical_size(response.get(key), response.get(&format!("{key}Unit")))
}

fn associated(
    response: &BridgeResponse,
    name: &str,
) -> Result<Option<AssociatedImage>, MetadataError> {
    let key = format!("Bioformats.Series.{name}");
    let Some(value) = present(response.get(&key)) else {
        return Ok(None);
    };
    let fields = value.as_object().ok_or_else(|| MetadataError::InvalidValue {
        key: key.clone(),
        message: "expected an object".to_string(),
    })?;
    Ok(Some(AssociatedImage {
        width: optional_u32(fields, "Width")?,
        height: optional_u32(fields, "Height")?,
        n_channels: optional_u32(fields, "Channels")?,
    }))
}

/// Complete `main` with acquisition details, physical sizes and associated
/// images.
pub fn map_known(
    response: &BridgeResponse,
    main: &ImageMetadata,
) -> Result<ImageMetadata, MetadataError> {
    let mut imd = main.clone();

    imd.acquisition_datetime = optional_string(response.get("Bioformats.Image.AcquisitionDate"));
    imd.description = optional_string(response.get("Bioformats.Image.Description"));

    imd.physical_size_x = physical_size(response, "Bioformats.Pixels.PhysicalSizeX")?;
    imd.physical_size_y = physical_size(response, "Bioformats.Pixels.PhysicalSizeY")?;
    imd.physical_size_z = physical_size(response, "Bioformats.Pixels.PhysicalSizeZ")?;
    imd.frame_rate = physical_size(response, "Bioformats.Pixels.TimeIncrement")?;

    imd.objective = Objective {
        nominal_magnification: present(response.get("Bioformats.Objective.NominalMagnification"))
            .and_then(parse_float),
        calibrated_magnification: present(
            response.get("Bioformats.Objective.CalibratedMagnification"),
        )
        .and_then(parse_float),
    };
    imd.microscope = Microscope {
        model: optional_string(response.get("Bioformats.Microscope.Model")),
    };

    imd.associated_macro = associated(response, "Macro")?;
    imd.associated_thumb = associated(response, "Thumb")?;
    imd.associated_label = associated(response, "Label")?;

    imd.is_complete = true;
    Ok(imd)
}

// =============================================================================
// Pyramid and planes
// =============================================================================

/// Map the resolution tiers, in bridge order.
pub fn map_pyramid(response: &BridgeResponse) -> Result<Pyramid, MetadataError> {
    let mut pyramid = Pyramid::new();
    for (i, tier) in list(response, PYRAMID)?.into_iter().enumerate() {
        let dimension = |name: &str| -> Result<u32, MetadataError> {
            optional_u32(tier, name)?.ok_or_else(|| MetadataError::InvalidValue {
                key: format!("{PYRAMID}[{i}].{name}"),
                message: "missing".to_string(),
            })
        };
        pyramid.insert_tier(PyramidTier {
            width: dimension("Width")?,
            height: dimension("Height")?,
            tile_width: optional_u32(tier, "TileWidth")?,
            tile_height: optional_u32(tier, "TileHeight")?,
        });
    }
    Ok(pyramid)
}

fn plane_field<'a>(
    plane: &'a Map<String, Value>,
    i: usize,
    name: &str,
) -> Result<&'a Value, MetadataError> {
    present(plane.get(name)).ok_or_else(|| MetadataError::InvalidValue {
        key: format!("{PLANES}[{i}].{name}"),
        message: "missing".to_string(),
    })
}

/// Map the plane table, sized from `main`.
pub fn map_planes(
    response: &BridgeResponse,
    main: &ImageMetadata,
) -> Result<PlanesInfo, MetadataError> {
    let mut planes = PlanesInfo::new(main.n_concrete_channels, main.depth, main.duration);

    for (i, plane) in list(response, PLANES)?.into_iter().enumerate() {
        let field = |name: &'static str| plane_field(plane, i, name);
        let c = parse_u32("TheC", field("TheC")?)?;
        let z = parse_u32("TheZ", field("TheZ")?)?;
        let t = parse_u32("TheT", field("TheT")?)?;

        planes.set(
            c,
            z,
            t,
            PlaneInfo {
                bf_index: parse_i64("_Index", field("_Index")?)?,
                bf_series: parse_i64("_Series", field("_Series")?)?,
            },
        )?;
    }
    Ok(planes)
}

// =============================================================================
// Raw metadata
// =============================================================================

/// Copy every unstructured key into a store.
///
/// Keys outside the `Bioformats` namespace are the format's own and are
/// prefixed with `namespace`.
pub fn map_raw(response: &BridgeResponse, namespace: &str) -> MetadataStore {
    let mut store = MetadataStore::new();
    for (key, value) in response.iter() {
        if STRUCTURED_PREFIXES.iter().any(|p| key.starts_with(p)) {
            continue;
        }
        if key.starts_with("Bioformats") {
            store.set(key, value.clone(), None);
        } else {
            store.set(key, value.clone(), Some(namespace));
        }
    }
    store
}
