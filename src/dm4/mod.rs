//! Reader for Gatan DigitalMicrograph (DM3 / DM4) image files.

#[cfg(test)]
pub(crate) mod fixture;
mod image;
mod parser;
mod tags;
mod types;

pub use image::{sanitize_unit, CalibrationRecord, Dm4Error, FormatError, ImageBuffer, Micrograph};
pub use parser::{DmFile, ParseError, Version};
pub use tags::{ArrayData, ArrayElement, TagEntry, TagGroup, TagNode, TagValue};
pub use types::{ElementType, Scalar};
