//! Parser for the DM3 / DM4 tag file layout.
//!
//! Layout summary (all header words big-endian):
//!
//! ```text
//! file   := version:u32 root_len:W byte_order:u32 group
//! group  := sorted:u8 open:u8 count:W entry*
//! entry  := kind:u8 label_len:u16 label [size:u64 (v4)] (group | data)
//! data   := "%%%%" info_len:W info:W* payload
//! ```
//!
//! `W` is a `u32` in version 3 and a `u64` in version 4. Payload values use
//! the byte order announced in the header.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::bytes::{ByteOrder, ByteReader, OutOfBounds};

use super::tags::{decode_utf16, ArrayData, ArrayElement, TagEntry, TagGroup, TagNode, TagValue};
use super::types::{ElementType, ARRAY_CODE, STRING_CODE, STRUCT_CODE};

const KIND_END: u8 = 0;
const KIND_GROUP: u8 = 20;
const KIND_DATA: u8 = 21;
const DATA_DELIMITER: &[u8; 4] = b"%%%%";
const MAX_DEPTH: usize = 64;

/// Structural errors in a DigitalMicrograph file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported DM file version: {0}")]
    UnsupportedVersion(u32),
    #[error("Invalid byte-order flag: {0}")]
    InvalidByteOrder(u32),
    #[error("Unexpected end of file at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("Unknown tag kind {kind} at offset {offset}")]
    UnknownTagKind { kind: u8, offset: usize },
    #[error("Missing data delimiter at offset {0}")]
    MissingDelimiter(usize),
    #[error("Unknown element type {0}")]
    UnknownType(u64),
    #[error("Malformed type descriptor for tag '{label}': {info:?}")]
    MalformedDescriptor { label: String, info: Vec<u64> },
    #[error("Tag groups nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("Missing tag: {0}")]
    MissingTag(String),
    #[error("Tag '{path}' has unexpected type (expected {expected})")]
    UnexpectedType { path: String, expected: &'static str },
}

impl From<OutOfBounds> for ParseError {
    fn from(e: OutOfBounds) -> Self {
        ParseError::UnexpectedEof {
            offset: e.offset,
            needed: e.needed,
        }
    }
}

/// Format version of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V3,
    V4,
}

impl Version {
    pub fn number(self) -> u32 {
        match self {
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }
}

/// A parsed DigitalMicrograph file.
#[derive(Debug, Clone)]
pub struct DmFile {
    pub version: Version,
    pub byte_order: ByteOrder,
    pub root: TagGroup,
}

impl DmFile {
    /// Parse a file already loaded into memory.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = ByteReader::new(bytes);

        let version = match reader.u32(ByteOrder::Big)? {
            3 => Version::V3,
            4 => Version::V4,
            other => return Err(ParseError::UnsupportedVersion(other)),
        };
        let mut parser = Parser { reader, version };
        let root_len = parser.word()?;
        let byte_order = match parser.reader.u32(ByteOrder::Big)? {
            0 => ByteOrder::Big,
            1 => ByteOrder::Little,
            other => return Err(ParseError::InvalidByteOrder(other)),
        };
        debug!(
            "DM{} header: root length {}, {}",
            version.number(),
            root_len,
            byte_order.as_str()
        );

        let root = parser.group(byte_order, 0)?;
        Ok(Self {
            version,
            byte_order,
            root,
        })
    }

    /// Read and parse a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, super::Dm4Error> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(Self::parse(&bytes)?)
    }
}

/// Type descriptor decoded from an info array.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Descriptor {
    Scalar(ElementType),
    String { len: u64 },
    Struct(Vec<ElementType>),
    Array { element: ArrayElement, len: u64 },
}

struct Parser<'a> {
    reader: ByteReader<'a>,
    version: Version,
}

impl<'a> Parser<'a> {
    fn word(&mut self) -> Result<u64, ParseError> {
        Ok(match self.version {
            Version::V3 => self.reader.u32(ByteOrder::Big)? as u64,
            Version::V4 => self.reader.u64(ByteOrder::Big)?,
        })
    }

    fn word_size(&self) -> usize {
        match self.version {
            Version::V3 => 4,
            Version::V4 => 8,
        }
    }

    fn group(&mut self, order: ByteOrder, depth: usize) -> Result<TagGroup, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }
        let sorted = self.reader.u8()? != 0;
        let open = self.reader.u8()? != 0;
        let count = self.word()?;

        let mut entries = Vec::new();
        for _ in 0..count {
            match self.entry(order, depth)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(TagGroup {
            sorted,
            open,
            entries,
        })
    }

    fn entry(&mut self, order: ByteOrder, depth: usize) -> Result<Option<TagEntry>, ParseError> {
        let offset = self.reader.position();
        let kind = self.reader.u8()?;
        if kind == KIND_END {
            return Ok(None);
        }
        let label_len = self.reader.u16(ByteOrder::Big)? as usize;
        let label: String = self.reader.take(label_len)?.iter().map(|&b| b as char).collect();
        if self.version == Version::V4 {
            // Total entry size; redundant with the structure that follows.
            self.reader.u64(ByteOrder::Big)?;
        }

        let node = match kind {
            KIND_GROUP => TagNode::Group(self.group(order, depth + 1)?),
            KIND_DATA => TagNode::Data(self.data(&label, order)?),
            other => return Err(ParseError::UnknownTagKind { kind: other, offset }),
        };
        Ok(Some(TagEntry { label, node }))
    }

    fn data(&mut self, label: &str, order: ByteOrder) -> Result<TagValue, ParseError> {
        let delimiter_at = self.reader.position();
        if self.reader.take(4)? != DATA_DELIMITER {
            return Err(ParseError::MissingDelimiter(delimiter_at));
        }
        let info_len = self.word()?;
        let info_bytes = (info_len as usize).saturating_mul(self.word_size());
        if info_bytes > self.reader.remaining() {
            return Err(ParseError::UnexpectedEof {
                offset: self.reader.position(),
                needed: info_bytes,
            });
        }
        let info = (0..info_len)
            .map(|_| self.word())
            .collect::<Result<Vec<u64>, _>>()?;

        let descriptor = descriptor(label, &info)?;
        self.payload(&descriptor, order)
    }

    fn payload(&mut self, descriptor: &Descriptor, order: ByteOrder) -> Result<TagValue, ParseError> {
        Ok(match descriptor {
            Descriptor::Scalar(ty) => TagValue::Scalar(ty.decode(self.reader.take(ty.size())?, order)),
            Descriptor::String { len } => {
                let bytes = self.take_elements(*len, 2)?;
                TagValue::String(decode_utf16(bytes, order))
            }
            Descriptor::Struct(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for ty in fields {
                    values.push(ty.decode(self.reader.take(ty.size())?, order));
                }
                TagValue::Struct(values)
            }
            Descriptor::Array { element, len } => {
                let bytes = self.take_elements(*len, element.size())?;
                TagValue::Array(ArrayData {
                    element: element.clone(),
                    len: *len,
                    order,
                    bytes: bytes.to_vec(),
                })
            }
        })
    }

    fn take_elements(&mut self, len: u64, size: usize) -> Result<&'a [u8], ParseError> {
        let total = usize::try_from(len)
            .ok()
            .and_then(|len| len.checked_mul(size))
            .ok_or(ParseError::UnexpectedEof {
                offset: self.reader.position(),
                needed: usize::MAX,
            })?;
        Ok(self.reader.take(total)?)
    }
}

fn scalar_type(code: u64) -> Result<ElementType, ParseError> {
    ElementType::from_code(code).ok_or(ParseError::UnknownType(code))
}

/// Struct field types from `[name_len, field_count, (name_len, type)*]`.
fn struct_fields(words: &[u64]) -> Option<Result<Vec<ElementType>, ParseError>> {
    let count = usize::try_from(*words.get(1)?).ok()?;
    let pairs = words.get(2..2 + count.checked_mul(2)?)?;
    Some(pairs.chunks_exact(2).map(|pair| scalar_type(pair[1])).collect())
}

fn descriptor(label: &str, info: &[u64]) -> Result<Descriptor, ParseError> {
    let malformed = || ParseError::MalformedDescriptor {
        label: label.to_string(),
        info: info.to_vec(),
    };

    match info {
        [code] => Ok(Descriptor::Scalar(scalar_type(*code)?)),
        [STRING_CODE, len] => Ok(Descriptor::String { len: *len }),
        [STRUCT_CODE, rest @ ..] => {
            let fields = struct_fields(rest).ok_or_else(malformed)??;
            if rest.len() != 2 + 2 * fields.len() {
                return Err(malformed());
            }
            Ok(Descriptor::Struct(fields))
        }
        [ARRAY_CODE, STRUCT_CODE, rest @ ..] => {
            let fields = struct_fields(rest).ok_or_else(malformed)??;
            let consumed = 2 + 2 * fields.len();
            match rest.get(consumed..) {
                Some([len]) => Ok(Descriptor::Array {
                    element: ArrayElement::Struct(fields),
                    len: *len,
                }),
                _ => Err(malformed()),
            }
        }
        [ARRAY_CODE, code, len] => Ok(Descriptor::Array {
            element: ArrayElement::Scalar(scalar_type(*code)?),
            len: *len,
        }),
        _ => Err(malformed()),
    }
}
