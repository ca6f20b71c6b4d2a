//! Extraction of the calibrated image from a parsed DigitalMicrograph file.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::parser::{DmFile, ParseError};
use super::tags::{ArrayElement, TagGroup, TagNode, TagValue};
use super::types::ElementType;

/// Pixel payload inconsistent with what the header declares.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("No images found in ImageList")]
    NoImages,
    #[error("Invalid dimensions: {0:?}")]
    InvalidDimensions(Vec<u64>),
    #[error("Dimension mismatch: header declares {expected} pixels, data holds {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },
    #[error("Bit depth mismatch: PixelDepth is {declared} bytes, data elements are {actual} bytes")]
    BitDepthMismatch { declared: u64, actual: usize },
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),
    #[error("Invalid calibration scale: {0}")]
    InvalidScale(f64),
}

/// Errors reading a micrograph from disk.
#[derive(Error, Debug)]
pub enum Dm4Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Physical size of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    /// Units per pixel along x.
    pub scale_x: f64,
    /// Units per pixel along y.
    pub scale_y: f64,
    /// Unit label, ASCII only (`µm` becomes `um`).
    pub unit: String,
}

/// Decoded pixel intensities, row-major, frame after frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub pixels: Vec<f64>,
}

impl ImageBuffer {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f64]> {
        self.pixels.chunks_exact(self.frame_len().max(1))
    }

    /// Smallest and largest finite intensity.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.pixels
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// The main image of a DigitalMicrograph file with its calibration.
#[derive(Debug, Clone)]
pub struct Micrograph {
    pub name: Option<String>,
    pub element_type: ElementType,
    pub calibration: CalibrationRecord,
    pub image: ImageBuffer,
}

impl Micrograph {
    /// Read a DM3 / DM4 file and extract its main image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Dm4Error> {
        let file = DmFile::open(path)?;
        Self::from_file(&file)
    }

    /// Extract the main image from a parsed file.
    ///
    /// `ImageList` starts with the thumbnail; the entry with the most pixels
    /// is taken as the main image, later entries winning ties.
    pub fn from_file(file: &DmFile) -> Result<Self, Dm4Error> {
        let list = file.root.group("ImageList")?;

        let mut best: Option<(u64, &TagGroup)> = None;
        let mut rejected = None;
        for (index, entry) in list.entries.iter().enumerate() {
            let TagNode::Group(image) = &entry.node else {
                continue;
            };
            let count = match dimensions(image) {
                Ok((_, count)) => count,
                Err(e) => {
                    debug!("ImageList.{} has no usable dimensions, skipping: {}", index, e);
                    rejected.get_or_insert(e);
                    continue;
                }
            };
            if best.map_or(true, |(best_count, _)| count >= best_count) {
                best = Some((count, image));
            }
        }
        let Some((_, image)) = best else {
            return Err(rejected.unwrap_or_else(|| FormatError::NoImages.into()));
        };

        let calibration = calibration(image)?;
        let (element_type, buffer) = pixels(image)?;
        Ok(Self {
            name: image.text("Name").ok(),
            element_type,
            calibration,
            image: buffer,
        })
    }
}

/// Declared dimensions and their pixel count.
fn dimensions(image: &TagGroup) -> Result<(Vec<u64>, u64), Dm4Error> {
    let dims = image
        .scalar_list("ImageData.Dimensions")?
        .iter()
        .map(|s| s.as_u64().unwrap_or(0))
        .collect::<Vec<_>>();
    if dims.is_empty() || dims.len() > 3 || dims.iter().any(|&d| d == 0 || d > u32::MAX as u64) {
        return Err(FormatError::InvalidDimensions(dims).into());
    }
    match dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d)) {
        Some(count) => Ok((dims, count)),
        None => Err(FormatError::InvalidDimensions(dims).into()),
    }
}

fn calibration(image: &TagGroup) -> Result<CalibrationRecord, Dm4Error> {
    let axes = image.group("ImageData.Calibrations.Dimension")?;
    let scale_x = axes.scalar("0.Scale")?.as_f64();
    let scale_y = match axes.scalar("1.Scale") {
        Ok(scale) => scale.as_f64(),
        Err(ParseError::MissingTag(_)) => scale_x,
        Err(e) => return Err(e.into()),
    };
    for scale in [scale_x, scale_y] {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(FormatError::InvalidScale(scale).into());
        }
    }
    let unit = match axes.text("0.Units") {
        Ok(unit) => sanitize_unit(&unit),
        Err(ParseError::MissingTag(_)) => String::new(),
        Err(e) => return Err(e.into()),
    };
    debug!("Calibration: {} x {} {}/pixel", scale_x, scale_y, unit);
    Ok(CalibrationRecord {
        scale_x,
        scale_y,
        unit,
    })
}

fn pixels(image: &TagGroup) -> Result<(ElementType, ImageBuffer), Dm4Error> {
    let (dims, expected) = dimensions(image)?;
    let array = match image.value("ImageData.Data")? {
        TagValue::Array(array) => array,
        _ => {
            return Err(ParseError::UnexpectedType {
                path: "ImageData.Data".to_string(),
                expected: "array",
            }
            .into())
        }
    };
    let element_type = match &array.element {
        ArrayElement::Scalar(ty) => *ty,
        ArrayElement::Struct(fields) => {
            let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
            return Err(FormatError::UnsupportedPixelType(format!("struct ({})", names.join(", "))).into());
        }
    };

    match image.scalar("ImageData.PixelDepth") {
        Ok(depth) => {
            let declared = depth.as_u64().unwrap_or(0);
            if declared != element_type.size() as u64 {
                return Err(FormatError::BitDepthMismatch {
                    declared,
                    actual: element_type.size(),
                }
                .into());
            }
        }
        Err(ParseError::MissingTag(_)) => {}
        Err(e) => return Err(e.into()),
    }

    if expected != array.len {
        return Err(FormatError::DimensionMismatch {
            expected,
            actual: array.len,
        }
        .into());
    }

    let pixels = array
        .scalars()
        .unwrap_or_default()
        .iter()
        .map(|s| s.as_f64())
        .collect();
    let buffer = ImageBuffer {
        width: dims[0] as u32,
        height: dims.get(1).copied().unwrap_or(1) as u32,
        depth: dims.get(2).copied().unwrap_or(1) as u32,
        pixels,
    };
    debug!(
        "Image: {}x{}x{} {}",
        buffer.width,
        buffer.height,
        buffer.depth,
        element_type.name()
    );
    Ok((element_type, buffer))
}

/// Replace micro signs with `u` so the label fits in a TIFF ASCII field.
pub fn sanitize_unit(unit: &str) -> String {
    unit.trim()
        .chars()
        .map(|c| match c {
            '\u{00B5}' | '\u{03BC}' => 'u',
            c => c,
        })
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::ByteOrder;
    use crate::dm4::fixture::{ramp, DmWriter};
    use crate::dm4::parser::Version;

    fn parse(bytes: &[u8]) -> Result<Micrograph, Dm4Error> {
        Micrograph::from_file(&DmFile::parse(bytes)?)
    }

    #[test]
    fn test_extracts_main_image_not_thumbnail() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.micrograph(0.5, "nm", 4, 3, &ramp(4, 3));
        let micrograph = parse(&bytes).unwrap();

        assert_eq!(micrograph.name.as_deref(), Some("main"));
        assert_eq!(micrograph.element_type, ElementType::F32);
        assert_eq!(micrograph.calibration.scale_x, 0.5);
        assert_eq!(micrograph.calibration.scale_y, 0.5);
        assert_eq!(micrograph.calibration.unit, "nm");
        assert_eq!(micrograph.image.width, 4);
        assert_eq!(micrograph.image.height, 3);
        assert_eq!(micrograph.image.depth, 1);
        assert_eq!(micrograph.image.pixels[5], 5.0);
    }

    #[test]
    fn test_big_endian_v3() {
        let w = DmWriter::new(Version::V3, ByteOrder::Big);
        let bytes = w.micrograph(2.0, "\u{00B5}m", 3, 2, &ramp(3, 2));
        let micrograph = parse(&bytes).unwrap();
        assert_eq!(micrograph.calibration.unit, "um");
        assert_eq!(micrograph.image.pixels, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_stack_dimensions() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.file(&[w.group_entry(
            "ImageList",
            &[w.image_entry("stack", 1.0, "nm", &[2, 2, 3], &ramp(4, 3))],
        )]);
        let micrograph = parse(&bytes).unwrap();
        assert_eq!(micrograph.image.depth, 3);
        assert_eq!(micrograph.image.frames().count(), 3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.micrograph(1.0, "nm", 4, 4, &ramp(4, 3));
        assert!(matches!(
            parse(&bytes),
            Err(Dm4Error::Format(FormatError::DimensionMismatch {
                expected: 16,
                actual: 12
            }))
        ));
    }

    #[test]
    fn test_bit_depth_mismatch() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let image = w.group_entry(
            "",
            &[w.group_entry(
                "ImageData",
                &[
                    w.group_entry(
                        "Calibrations",
                        &[w.group_entry(
                            "Dimension",
                            &[w.group_entry("", &[w.f32_entry("Scale", 1.0)])],
                        )],
                    ),
                    w.u16_array_entry("Data", &[1, 2, 3, 4]),
                    w.group_entry("Dimensions", &[w.u32_entry("", 2), w.u32_entry("", 2)]),
                    w.u32_entry("PixelDepth", 4),
                ],
            )],
        );
        let bytes = w.file(&[w.group_entry("ImageList", &[image])]);
        assert!(matches!(
            parse(&bytes),
            Err(Dm4Error::Format(FormatError::BitDepthMismatch {
                declared: 4,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_missing_image_list() {
        let w = DmWriter::new(Version::V3, ByteOrder::Little);
        let bytes = w.file(&[w.f32_entry("Scale", 1.0)]);
        assert!(matches!(
            parse(&bytes),
            Err(Dm4Error::Parse(ParseError::MissingTag(_)))
        ));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.micrograph(0.0, "nm", 2, 2, &ramp(2, 2));
        assert!(matches!(
            parse(&bytes),
            Err(Dm4Error::Format(FormatError::InvalidScale(_)))
        ));
    }

    #[test]
    fn test_overflowing_dimensions_rejected() {
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.file(&[w.group_entry(
            "ImageList",
            &[w.image_entry("huge", 1.0, "nm", &[1 << 22, 1 << 22, 1 << 21], &[0.0; 4])],
        )]);
        assert!(matches!(
            parse(&bytes),
            Err(Dm4Error::Format(FormatError::InvalidDimensions(dims))) if dims.len() == 3
        ));
    }

    #[test]
    fn test_sanitize_unit() {
        assert_eq!(sanitize_unit(" \u{03BC}m "), "um");
        assert_eq!(sanitize_unit("1/nm"), "1/nm");
    }

    #[test]
    fn test_min_max_skips_nan() {
        let buffer = ImageBuffer {
            width: 3,
            height: 1,
            depth: 1,
            pixels: vec![f64::NAN, 2.0, -1.0],
        };
        assert_eq!(buffer.min_max(), Some((-1.0, 2.0)));
    }
}
