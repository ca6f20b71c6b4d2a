//! Minimal classic TIFF directory reader.
//!
//! Only the first image file directory (IFD0) is read. Values are located,
//! not copied, so that resolution tags can be patched in place without
//! touching any other byte of the file.

use std::path::Path;

use thiserror::Error;
use tiff::tags::Tag;

use crate::bytes::{put_u32, ByteOrder, ByteReader, OutOfBounds};

use super::resolution::{to_rational, to_srational, Resolution, ResolutionUnit};

pub const TAG_IMAGE_DESCRIPTION: u16 = 270;
pub const TAG_X_RESOLUTION: u16 = 282;
pub const TAG_Y_RESOLUTION: u16 = 283;
pub const TAG_RESOLUTION_UNIT: u16 = 296;

pub const TYPE_BYTE: u16 = 1;
pub const TYPE_ASCII: u16 = 2;
pub const TYPE_SHORT: u16 = 3;
pub const TYPE_LONG: u16 = 4;
pub const TYPE_RATIONAL: u16 = 5;
pub const TYPE_SRATIONAL: u16 = 10;

/// TIFF reading and writing errors.
#[derive(Error, Debug)]
pub enum TiffError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a TIFF file (bad byte-order marker)")]
    NotTiff,
    #[error("Unsupported TIFF variant: {0}")]
    Unsupported(String),
    #[error("Truncated TIFF: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("Missing tag: {0}")]
    MissingTag(&'static str),
    #[error("Tag {tag} has unexpected field type {field_type}")]
    UnexpectedType { tag: u16, field_type: u16 },
    #[error("Value {value} cannot be stored in tag {tag}")]
    Unrepresentable { tag: u16, value: f64 },
    #[error("TIFF encoding failed: {0}")]
    Encode(#[from] tiff::TiffError),
}

impl From<OutOfBounds> for TiffError {
    fn from(e: OutOfBounds) -> Self {
        TiffError::Truncated {
            offset: e.offset,
            needed: e.needed,
        }
    }
}

/// One 12-byte directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    /// Offset of the entry itself within the file.
    pub entry_offset: usize,
}

impl IfdEntry {
    fn type_size(&self) -> Option<usize> {
        match self.field_type {
            1 | 2 | 6 | 7 => Some(1),
            3 | 8 => Some(2),
            4 | 9 | 11 => Some(4),
            5 | 10 | 12 => Some(8),
            _ => None,
        }
    }

    /// Offset of the first value byte: inline in the entry when the values
    /// fit in four bytes, otherwise at the stored offset.
    pub fn value_offset(&self, bytes: &[u8], order: ByteOrder) -> Result<usize, TiffError> {
        let size = self
            .type_size()
            .ok_or(TiffError::UnexpectedType {
                tag: self.tag,
                field_type: self.field_type,
            })?
            .saturating_mul(self.count as usize);
        if size <= 4 {
            Ok(self.entry_offset + 8)
        } else {
            let mut reader = ByteReader::at(bytes, self.entry_offset + 8)?;
            Ok(reader.u32(order)? as usize)
        }
    }
}

/// Directory layout of a classic TIFF file.
#[derive(Debug, Clone)]
pub struct TiffLayout {
    pub byte_order: ByteOrder,
    pub entries: Vec<IfdEntry>,
}

impl TiffLayout {
    pub fn parse(bytes: &[u8]) -> Result<Self, TiffError> {
        let mut reader = ByteReader::new(bytes);
        let byte_order = match reader.take(2) {
            Ok(b"II") => ByteOrder::Little,
            Ok(b"MM") => ByteOrder::Big,
            _ => return Err(TiffError::NotTiff),
        };
        match reader.u16(byte_order)? {
            42 => {}
            43 => return Err(TiffError::Unsupported("BigTIFF".to_string())),
            other => return Err(TiffError::Unsupported(format!("magic number {}", other))),
        }
        let ifd0 = reader.u32(byte_order)? as usize;

        let mut reader = ByteReader::at(bytes, ifd0)?;
        let count = reader.u16(byte_order)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry_offset = reader.position();
            let tag = reader.u16(byte_order)?;
            let field_type = reader.u16(byte_order)?;
            let count = reader.u32(byte_order)?;
            reader.take(4)?;
            entries.push(IfdEntry {
                tag,
                field_type,
                count,
                entry_offset,
            });
        }
        Ok(Self {
            byte_order,
            entries,
        })
    }

    pub fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    fn rational(&self, bytes: &[u8], entry: &IfdEntry) -> Result<f64, TiffError> {
        if entry.count == 0 {
            return Err(TiffError::UnexpectedType {
                tag: entry.tag,
                field_type: entry.field_type,
            });
        }
        let offset = entry.value_offset(bytes, self.byte_order)?;
        let mut reader = ByteReader::at(bytes, offset)?;
        let num = reader.u32(self.byte_order)?;
        let den = reader.u32(self.byte_order)?;
        match entry.field_type {
            TYPE_RATIONAL => Ok(num as f64 / den as f64),
            TYPE_SRATIONAL => Ok(num as i32 as f64 / den as i32 as f64),
            other => Err(TiffError::UnexpectedType {
                tag: entry.tag,
                field_type: other,
            }),
        }
    }

    /// First SHORT or LONG value of a tag.
    pub fn integer(&self, bytes: &[u8], tag: u16) -> Result<Option<u32>, TiffError> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        let offset = entry.value_offset(bytes, self.byte_order)?;
        let mut reader = ByteReader::at(bytes, offset)?;
        match entry.field_type {
            TYPE_SHORT => Ok(Some(reader.u16(self.byte_order)? as u32)),
            TYPE_LONG => Ok(Some(reader.u32(self.byte_order)?)),
            other => Err(TiffError::UnexpectedType {
                tag,
                field_type: other,
            }),
        }
    }

    /// ASCII tag value without the trailing NUL.
    pub fn ascii(&self, bytes: &[u8], tag: u16) -> Result<Option<String>, TiffError> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        if entry.field_type != TYPE_ASCII {
            return Err(TiffError::UnexpectedType {
                tag,
                field_type: entry.field_type,
            });
        }
        let offset = entry.value_offset(bytes, self.byte_order)?;
        let mut reader = ByteReader::at(bytes, offset)?;
        let raw = reader.take(entry.count as usize)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()))
    }

    /// XResolution, YResolution and ResolutionUnit (TIFF default: inch).
    pub fn resolution(&self, bytes: &[u8]) -> Result<Resolution, TiffError> {
        let x = self
            .entry(TAG_X_RESOLUTION)
            .ok_or(TiffError::MissingTag("XResolution"))?;
        let y = self
            .entry(TAG_Y_RESOLUTION)
            .ok_or(TiffError::MissingTag("YResolution"))?;
        let unit = self
            .integer(bytes, TAG_RESOLUTION_UNIT)?
            .and_then(|code| u16::try_from(code).ok())
            .and_then(ResolutionUnit::from_code)
            .unwrap_or(ResolutionUnit::Inch);
        Ok(Resolution::new(
            self.rational(bytes, x)?,
            self.rational(bytes, y)?,
            unit,
        ))
    }

    /// Overwrite the XResolution and YResolution values in `bytes`.
    ///
    /// Only the eight value bytes of each tag change; the unit is left as is.
    pub fn patch_resolution(&self, bytes: &mut [u8], resolution: &Resolution) -> Result<(), TiffError> {
        for (tag, name, value) in [
            (TAG_X_RESOLUTION, "XResolution", resolution.x),
            (TAG_Y_RESOLUTION, "YResolution", resolution.y),
        ] {
            let entry = *self.entry(tag).ok_or(TiffError::MissingTag(name))?;
            let (num, den) = match entry.field_type {
                TYPE_RATIONAL => to_rational(value),
                TYPE_SRATIONAL => to_srational(value).map(|(n, d)| (n as u32, d as u32)),
                other => {
                    return Err(TiffError::UnexpectedType {
                        tag,
                        field_type: other,
                    })
                }
            }
            .filter(|&(_, den)| den != 0)
            .ok_or(TiffError::Unrepresentable { tag, value })?;

            let offset = entry.value_offset(bytes, self.byte_order)?;
            put_u32(bytes, offset, num, self.byte_order)?;
            put_u32(bytes, offset + 4, den, self.byte_order)?;
        }
        Ok(())
    }
}

/// Name of a tag known to the `tiff` crate.
pub fn tag_name(tag: u16) -> Option<String> {
    Tag::from_u16(tag).map(|known| format!("{:?}", known))
}

/// One IFD0 entry rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSummary {
    pub tag: u16,
    pub name: Option<String>,
    pub field_type: u16,
    pub count: u32,
    pub value: String,
}

const MAX_LISTED_VALUES: usize = 8;

fn render(layout: &TiffLayout, bytes: &[u8], entry: &IfdEntry) -> Result<String, TiffError> {
    let order = layout.byte_order;
    if entry.field_type == TYPE_ASCII {
        return Ok(format!("{:?}", layout.ascii(bytes, entry.tag)?.unwrap_or_default()));
    }
    let Some(size) = entry.type_size() else {
        return Ok(format!("<type {}>", entry.field_type));
    };
    let offset = entry.value_offset(bytes, order)?;
    let mut reader = ByteReader::at(bytes, offset)?;
    let shown = (entry.count as usize).min(MAX_LISTED_VALUES);
    let mut values = Vec::with_capacity(shown);
    for _ in 0..shown {
        values.push(match entry.field_type {
            TYPE_BYTE => reader.u8()?.to_string(),
            TYPE_SHORT => reader.u16(order)?.to_string(),
            TYPE_LONG => reader.u32(order)?.to_string(),
            TYPE_RATIONAL => {
                let n = reader.u32(order)?;
                let d = reader.u32(order)?;
                format!("{}/{}", n, d)
            }
            TYPE_SRATIONAL => {
                let n = reader.u32(order)? as i32;
                let d = reader.u32(order)? as i32;
                format!("{}/{}", n, d)
            }
            _ => {
                reader.take(size)?;
                "?".to_string()
            }
        });
    }
    let mut text = values.join(", ");
    if entry.count as usize > shown {
        text.push_str(&format!(", ... ({} values)", entry.count));
    }
    Ok(text)
}

/// All IFD0 tags of a TIFF file.
pub fn read_tags(path: impl AsRef<Path>) -> Result<Vec<TagSummary>, TiffError> {
    let bytes = std::fs::read(path.as_ref())?;
    let layout = TiffLayout::parse(&bytes)?;
    layout
        .entries
        .iter()
        .map(|entry| {
            Ok(TagSummary {
                tag: entry.tag,
                name: tag_name(entry.tag),
                field_type: entry.field_type,
                count: entry.count,
                value: render(&layout, &bytes, entry)?,
            })
        })
        .collect()
}

/// Resolution tags of a TIFF file.
pub fn read_resolution(path: impl AsRef<Path>) -> Result<Resolution, TiffError> {
    let bytes = std::fs::read(path.as_ref())?;
    TiffLayout::parse(&bytes)?.resolution(&bytes)
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

    /// Offset of the XResolution payload; YResolution follows it.
    pub(crate) const X_RESOLUTION_OFFSET: usize = 8 + 2 + 8 * 12 + 4;

    /// A 2x2 8-bit little-endian TIFF with the given resolution rationals.
    pub(crate) fn tiff_with_resolution(x: (u32, u32), y: (u32, u32)) -> Vec<u8> {
        tiff_fixture(ByteOrder::Little, TYPE_RATIONAL, x, y)
    }

    /// A 2x2 8-bit TIFF in `order` whose resolution tags have `field_type`.
    pub(crate) fn tiff_fixture(order: ByteOrder, field_type: u16, x: (u32, u32), y: (u32, u32)) -> Vec<u8> {
        match order {
            ByteOrder::Little => build::<LittleEndian>(b"II", field_type, x, y),
            ByteOrder::Big => build::<BigEndian>(b"MM", field_type, x, y),
        }
    }

    fn build<E: byteorder::ByteOrder>(marker: &[u8; 2], field_type: u16, x: (u32, u32), y: (u32, u32)) -> Vec<u8> {
        let entries: [(u16, u16, u32); 8] = [
            (256, TYPE_SHORT, 2),
            (257, TYPE_SHORT, 2),
            (258, TYPE_SHORT, 8),
            (262, TYPE_SHORT, 1),
            (273, TYPE_LONG, 0),
            (279, TYPE_LONG, 4),
            (TAG_X_RESOLUTION, field_type, 0),
            (TAG_Y_RESOLUTION, field_type, 0),
        ];
        let x_off = X_RESOLUTION_OFFSET;
        let y_off = x_off + 8;
        let pixels_off = y_off + 8;

        let mut out = marker.to_vec();
        out.write_u16::<E>(42).unwrap();
        out.write_u32::<E>(8).unwrap();
        out.write_u16::<E>(entries.len() as u16).unwrap();
        for (tag, ty, value) in entries {
            out.write_u16::<E>(tag).unwrap();
            out.write_u16::<E>(ty).unwrap();
            out.write_u32::<E>(1).unwrap();
            match tag {
                // SHORT values sit left-justified in the 4-byte field.
                256 | 257 | 258 | 262 => {
                    out.write_u16::<E>(value as u16).unwrap();
                    out.write_u16::<E>(0).unwrap();
                }
                273 => out.write_u32::<E>(pixels_off as u32).unwrap(),
                TAG_X_RESOLUTION => out.write_u32::<E>(x_off as u32).unwrap(),
                TAG_Y_RESOLUTION => out.write_u32::<E>(y_off as u32).unwrap(),
                _ => out.write_u32::<E>(value).unwrap(),
            }
        }
        out.write_u32::<E>(0).unwrap();
        for v in [x.0, x.1, y.0, y.1] {
            out.write_u32::<E>(v).unwrap();
        }
        out.extend_from_slice(&[10, 20, 30, 40]);
        out
    }
}
