//! Mapping of raw detector intensities to output samples.
//!
//! Raw micrographs rarely use their full dynamic range, so the default
//! mapping normalises to `[0, 1]` and clips the histogram tails before
//! scaling to 8 bits.

use image::{GrayImage, Luma};
use imageproc::stats::histogram;
use serde::{Deserialize, Serialize};

use crate::dm4::ImageBuffer;
use crate::raster::{Frames, GrayFloatImage};

/// Fraction of pixels clipped at the dark end by [`PixelMode::Stretch`].
pub const LOW_TAIL: f64 = 1e-3;
/// Fraction of pixels clipped at the bright end by [`PixelMode::Stretch`].
pub const HIGH_TAIL: f64 = 1.5e-4;

/// How intensities are written to the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelMode {
    /// 8-bit with histogram tails clipped.
    #[default]
    Stretch,
    /// 8-bit min-max scaling.
    Linear,
    /// 8-bit with the median intensity mapped to 128.
    Median,
    /// Raw intensities as 32-bit floats.
    Float,
}

impl PixelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelMode::Stretch => "stretch",
            PixelMode::Linear => "linear",
            PixelMode::Median => "median",
            PixelMode::Float => "float",
        }
    }
}

impl std::str::FromStr for PixelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stretch" | "contrast" => Ok(PixelMode::Stretch),
            "linear" => Ok(PixelMode::Linear),
            "median" => Ok(PixelMode::Median),
            "float" | "raw" => Ok(PixelMode::Float),
            other => Err(format!("unknown pixel mode '{}'", other)),
        }
    }
}

/// Map `buffer` into output frames.
pub fn map_pixels(buffer: &ImageBuffer, mode: PixelMode) -> Frames {
    if mode == PixelMode::Float {
        return Frames::Float32(
            buffer
                .frames()
                .map(|frame| {
                    GrayFloatImage::from_fn(buffer.width, buffer.height, |x, y| {
                        Luma([frame[index(buffer, x, y)] as f32])
                    })
                })
                .collect(),
        );
    }

    let norm = normalized(buffer);
    match mode {
        PixelMode::Stretch => {
            let quantized = gray_frames(buffer, &norm, |v| (v * 256.0).floor());
            if let Some((low, high)) = stretch_bounds(&quantized) {
                let span = high - low;
                return Frames::Gray8(gray_frames(buffer, &norm, |v| (v - low) * 255.0 / span));
            }
        }
        PixelMode::Median => {
            if let Some(median) = median(&norm).filter(|&m| m > 0.0) {
                return Frames::Gray8(gray_frames(buffer, &norm, |v| v * 128.0 / median));
            }
        }
        PixelMode::Linear | PixelMode::Float => {}
    }
    Frames::Gray8(gray_frames(buffer, &norm, |v| v * 255.0))
}

/// Median of `values`, averaging the two middle values for even lengths.
fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn index(buffer: &ImageBuffer, x: u32, y: u32) -> usize {
    y as usize * buffer.width as usize + x as usize
}

/// Intensities scaled to `[0, 1]`; non-finite values map to 0.
fn normalized(buffer: &ImageBuffer) -> Vec<f64> {
    let (min, max) = buffer.min_max().unwrap_or((0.0, 0.0));
    let span = max - min;
    buffer
        .pixels
        .iter()
        .map(|&v| {
            if !v.is_finite() || span <= 0.0 {
                0.0
            } else {
                (v - min) / span
            }
        })
        .collect()
}

fn gray_frames(buffer: &ImageBuffer, norm: &[f64], map: impl Fn(f64) -> f64) -> Vec<GrayImage> {
    let frame_len = buffer.frame_len().max(1);
    norm.chunks_exact(frame_len)
        .map(|frame| {
            GrayImage::from_fn(buffer.width, buffer.height, |x, y| {
                let value = map(frame[index(buffer, x, y)]);
                Luma([value.clamp(0.0, 255.0) as u8])
            })
        })
        .collect()
}

/// Normalised clip bounds from a 256-bin histogram of quantised frames.
///
/// The low bound is the start of the first bin where the cumulative fraction
/// exceeds [`LOW_TAIL`]; the high bound is the end of the first bin where it
/// exceeds `1 - HIGH_TAIL`. A bin only qualifies when the next bin's count
/// differs from its own, and the last bin is never a candidate.
pub fn stretch_bounds(frames: &[GrayImage]) -> Option<(f64, f64)> {
    let mut bins = [0u64; 256];
    for frame in frames {
        let hist = histogram(frame);
        for (bin, count) in bins.iter_mut().zip(hist.channels[0].iter()) {
            *bin += *count as u64;
        }
    }
    let total: u64 = bins.iter().sum();
    if total == 0 {
        return None;
    }

    let mut cumulative = 0u64;
    let (mut low, mut high) = (None, None);
    for (bin, pair) in bins.windows(2).enumerate() {
        cumulative += pair[0];
        if pair[1] == pair[0] {
            continue;
        }
        let fraction = cumulative as f64 / total as f64;
        if low.is_none() && fraction > LOW_TAIL {
            low = Some(bin as f64 / 256.0);
        }
        if high.is_none() && fraction > 1.0 - HIGH_TAIL {
            high = Some((bin + 1) as f64 / 256.0);
        }
    }
    match (low, high) {
        (Some(low), Some(high)) if high > low => Some((low, high)),
        _ => None,
    }
}
