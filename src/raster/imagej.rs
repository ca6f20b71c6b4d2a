//! ImageJ conventions for calibrated TIFF files.
//!
//! ImageJ stores the physical unit in the `ImageDescription` tag
//! (`unit=nm`) and the pixel density in XResolution / YResolution with
//! `ResolutionUnit = None`.

use std::path::Path;

use super::ifd::{TiffError, TiffLayout, TAG_IMAGE_DESCRIPTION};

/// ImageJ version announced in written descriptions.
pub const IMAGEJ_VERSION: &str = "1.53k";

/// Build an ImageJ image description.
pub fn description(unit: &str, frames: u32) -> String {
    let mut text = format!("ImageJ={}\n", IMAGEJ_VERSION);
    if frames > 1 {
        text.push_str(&format!("images={}\nslices={}\n", frames, frames));
    }
    if !unit.is_empty() {
        text.push_str(&format!("unit={}\n", unit));
    }
    text
}

/// `unit=` value of an ImageJ description.
pub fn parse_unit(description: &str) -> Option<String> {
    description
        .lines()
        .find_map(|line| line.strip_prefix("unit="))
        .map(|unit| unit.trim().to_string())
}

/// Calibration read back from an ImageJ TIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJScale {
    pub unit: Option<String>,
    /// Pixels per unit along x.
    pub x_resolution: f64,
    /// Pixels per unit along y.
    pub y_resolution: f64,
}

impl ImageJScale {
    /// Units per pixel along x.
    pub fn pixel_width(&self) -> f64 {
        1.0 / self.x_resolution
    }

    /// Units per pixel along y.
    pub fn pixel_height(&self) -> f64 {
        1.0 / self.y_resolution
    }
}

/// Unit and resolution of a TIFF written for ImageJ.
pub fn imagej_scale(path: impl AsRef<Path>) -> Result<ImageJScale, TiffError> {
    let bytes = std::fs::read(path.as_ref())?;
    let layout = TiffLayout::parse(&bytes)?;
    let resolution = layout.resolution(&bytes)?;
    let unit = layout
        .ascii(&bytes, TAG_IMAGE_DESCRIPTION)?
        .as_deref()
        .and_then(parse_unit);
    Ok(ImageJScale {
        unit,
        x_resolution: resolution.x,
        y_resolution: resolution.y,
    })
}
