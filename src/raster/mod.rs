//! TIFF output and resolution metadata.

pub mod ifd;
pub mod imagej;
mod resolution;
mod writer;

pub use ifd::{read_resolution, read_tags, TagSummary, TiffError, TiffLayout};
pub use imagej::{imagej_scale, ImageJScale};
pub use resolution::{approximate, to_rational, to_srational, Resolution, ResolutionUnit};
pub use writer::{write_tiff, Frames, GrayFloatImage, RasterImage};
