//! In-memory tag tree of a DigitalMicrograph file.

use std::fmt::Write as _;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::bytes::ByteOrder;

use super::parser::ParseError;
use super::types::{ElementType, Scalar};

/// Element layout of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayElement {
    Scalar(ElementType),
    Struct(Vec<ElementType>),
}

impl ArrayElement {
    pub fn size(&self) -> usize {
        match self {
            ArrayElement::Scalar(ty) => ty.size(),
            ArrayElement::Struct(fields) => fields.iter().map(|f| f.size()).sum(),
        }
    }
}

/// Raw array payload, decoded on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    pub element: ArrayElement,
    pub len: u64,
    pub order: ByteOrder,
    pub bytes: Vec<u8>,
}

impl ArrayData {
    /// Decode every element of a scalar array.
    pub fn scalars(&self) -> Option<Vec<Scalar>> {
        match self.element {
            ArrayElement::Scalar(ty) => Some(
                self.bytes
                    .chunks_exact(ty.size())
                    .map(|chunk| ty.decode(chunk, self.order))
                    .collect(),
            ),
            ArrayElement::Struct(_) => None,
        }
    }

    /// Interpret a `u16` array as UTF-16 text, the way labels such as
    /// `Units` are stored.
    pub fn as_utf16(&self) -> Option<String> {
        if self.element != ArrayElement::Scalar(ElementType::U16) {
            return None;
        }
        Some(decode_utf16(&self.bytes, self.order))
    }
}

pub(crate) fn decode_utf16(bytes: &[u8], order: ByteOrder) -> String {
    let even = bytes.len() / 2 * 2;
    let mut units = vec![0u16; even / 2];
    match order {
        ByteOrder::Big => BigEndian::read_u16_into(&bytes[..even], &mut units),
        ByteOrder::Little => LittleEndian::read_u16_into(&bytes[..even], &mut units),
    }
    String::from_utf16_lossy(&units)
}

/// Value carried by a data tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Scalar(Scalar),
    String(String),
    Struct(Vec<Scalar>),
    Array(ArrayData),
}

impl TagValue {
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            TagValue::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Text from either a string value or a UTF-16 array.
    pub fn as_text(&self) -> Option<String> {
        match self {
            TagValue::String(s) => Some(s.clone()),
            TagValue::Array(array) => array.as_utf16(),
            _ => None,
        }
    }

    fn summary(&self) -> String {
        match self {
            TagValue::Scalar(s) => s.to_string(),
            TagValue::String(s) => format!("{:?}", s),
            TagValue::Struct(fields) => {
                let parts: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
                format!("({})", parts.join(", "))
            }
            TagValue::Array(array) => match (&array.element, array.as_utf16()) {
                (_, Some(text)) if array.len <= 256 => format!("{:?}", text),
                (ArrayElement::Scalar(ty), _) => format!("[{}; {}]", ty.name(), array.len),
                (ArrayElement::Struct(fields), _) => {
                    let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
                    format!("[({}); {}]", names.join(", "), array.len)
                }
            },
        }
    }
}

/// Either a nested group or a data value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagNode {
    Group(TagGroup),
    Data(TagValue),
}

/// A labelled entry of a group. List entries have empty labels.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    pub label: String,
    pub node: TagNode,
}

/// A group of tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagGroup {
    pub sorted: bool,
    pub open: bool,
    pub entries: Vec<TagEntry>,
}

impl TagGroup {
    /// Look up a node by a dotted path.
    ///
    /// Each segment matches an entry label first; a numeric segment that
    /// matches no label indexes into the entries, which is how unlabelled
    /// lists such as `ImageList` are addressed (`ImageList.1.ImageData`).
    pub fn get(&self, path: &str) -> Option<&TagNode> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.child(first)?;
        for segment in segments {
            match node {
                TagNode::Group(group) => node = group.child(segment)?,
                TagNode::Data(_) => return None,
            }
        }
        Some(node)
    }

    fn child(&self, segment: &str) -> Option<&TagNode> {
        if let Some(entry) = self.entries.iter().find(|e| e.label == segment) {
            return Some(&entry.node);
        }
        let index: usize = segment.parse().ok()?;
        self.entries.get(index).map(|e| &e.node)
    }

    pub fn group(&self, path: &str) -> Result<&TagGroup, ParseError> {
        match self.get(path) {
            Some(TagNode::Group(group)) => Ok(group),
            Some(TagNode::Data(_)) => Err(ParseError::UnexpectedType {
                path: path.to_string(),
                expected: "group",
            }),
            None => Err(ParseError::MissingTag(path.to_string())),
        }
    }

    pub fn value(&self, path: &str) -> Result<&TagValue, ParseError> {
        match self.get(path) {
            Some(TagNode::Data(value)) => Ok(value),
            Some(TagNode::Group(_)) => Err(ParseError::UnexpectedType {
                path: path.to_string(),
                expected: "data",
            }),
            None => Err(ParseError::MissingTag(path.to_string())),
        }
    }

    pub fn scalar(&self, path: &str) -> Result<Scalar, ParseError> {
        self.value(path)?
            .as_scalar()
            .ok_or_else(|| ParseError::UnexpectedType {
                path: path.to_string(),
                expected: "scalar",
            })
    }

    pub fn text(&self, path: &str) -> Result<String, ParseError> {
        self.value(path)?
            .as_text()
            .ok_or_else(|| ParseError::UnexpectedType {
                path: path.to_string(),
                expected: "text",
            })
    }

    /// Scalars of an unlabelled list group, e.g. `Dimensions`.
    pub fn scalar_list(&self, path: &str) -> Result<Vec<Scalar>, ParseError> {
        self.group(path)?
            .entries
            .iter()
            .map(|entry| match &entry.node {
                TagNode::Data(TagValue::Scalar(s)) => Ok(*s),
                _ => Err(ParseError::UnexpectedType {
                    path: path.to_string(),
                    expected: "list of scalars",
                }),
            })
            .collect()
    }

    /// Indented rendering of the whole tree.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        for (index, entry) in self.entries.iter().enumerate() {
            let indent = "  ".repeat(depth);
            let label = if entry.label.is_empty() {
                format!("[{}]", index)
            } else {
                entry.label.clone()
            };
            match &entry.node {
                TagNode::Group(group) => {
                    let _ = writeln!(out, "{}{}/", indent, label);
                    group.dump_into(out, depth + 1);
                }
                TagNode::Data(value) => {
                    let _ = writeln!(out, "{}{} = {}", indent, label, value.summary());
                }
            }
        }
    }
}
