//! Calibrated TIFF output.

use std::io::{Seek, Write};
use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::debug;

use crate::atomic::write_atomic;

use super::ifd::{TiffError, TAG_X_RESOLUTION, TAG_Y_RESOLUTION};
use super::imagej;
use super::resolution::{to_rational, Resolution};

/// A single-channel 32-bit float image.
pub type GrayFloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Pages of an output file.
#[derive(Debug, Clone)]
pub enum Frames {
    Gray8(Vec<GrayImage>),
    Float32(Vec<GrayFloatImage>),
}

impl Frames {
    pub fn len(&self) -> usize {
        match self {
            Frames::Gray8(frames) => frames.len(),
            Frames::Float32(frames) => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Image data plus the calibration to embed.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub frames: Frames,
    pub resolution: Resolution,
    /// Unit named in the ImageJ description; empty for none.
    pub unit: String,
}

fn rational(tag: u16, value: f64) -> Result<(u32, u32), TiffError> {
    to_rational(value)
        .filter(|&(n, d)| n != 0 && d != 0)
        .ok_or(TiffError::Unrepresentable { tag, value })
}

struct PageMeta<'a> {
    x: (u32, u32),
    y: (u32, u32),
    resolution: &'a Resolution,
    description: Option<&'a str>,
}

fn write_page<W, C>(
    encoder: &mut TiffEncoder<W>,
    width: u32,
    height: u32,
    data: &[C::Inner],
    meta: &PageMeta<'_>,
) -> Result<(), TiffError>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let mut page = encoder.new_image::<C>(width, height)?;
    page.resolution_unit(meta.resolution.unit.to_tiff());
    page.x_resolution(Rational {
        n: meta.x.0,
        d: meta.x.1,
    });
    page.y_resolution(Rational {
        n: meta.y.0,
        d: meta.y.1,
    });
    if let Some(description) = meta.description {
        page.encoder().write_tag(Tag::ImageDescription, description)?;
    }
    page.write_data(data)?;
    Ok(())
}

/// Write `image` to `path` as a (multi-page) TIFF.
///
/// The file appears only once it is complete.
pub fn write_tiff(path: &Path, image: &RasterImage) -> Result<(), TiffError> {
    if image.frames.is_empty() {
        return Err(TiffError::Unsupported("image without frames".to_string()));
    }
    let description = imagej::description(&image.unit, image.frames.len() as u32);
    let meta = PageMeta {
        x: rational(TAG_X_RESOLUTION, image.resolution.x)?,
        y: rational(TAG_Y_RESOLUTION, image.resolution.y)?,
        resolution: &image.resolution,
        description: Some(description.as_str()),
    };
    let rest = PageMeta {
        description: None,
        ..meta
    };
    debug!(
        "Writing {} page(s) to {} at {}/{} px per {}",
        image.frames.len(),
        path.display(),
        meta.x.0,
        meta.x.1,
        if image.unit.is_empty() { "unit" } else { image.unit.as_str() }
    );

    write_atomic(path, |writer| {
        let mut encoder = TiffEncoder::new(writer)?;
        match &image.frames {
            Frames::Gray8(frames) => {
                for (index, frame) in frames.iter().enumerate() {
                    let page_meta = if index == 0 { &meta } else { &rest };
                    write_page::<_, colortype::Gray8>(
                        &mut encoder,
                        frame.width(),
                        frame.height(),
                        frame.as_raw(),
                        page_meta,
                    )?;
                }
            }
            Frames::Float32(frames) => {
                for (index, frame) in frames.iter().enumerate() {
                    let page_meta = if index == 0 { &meta } else { &rest };
                    write_page::<_, colortype::Gray32Float>(
                        &mut encoder,
                        frame.width(),
                        frame.height(),
                        frame.as_raw(),
                        page_meta,
                    )?;
                }
            }
        }
        Ok(())
    })
}
