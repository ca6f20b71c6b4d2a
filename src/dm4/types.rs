//! Element types of DigitalMicrograph tag data.

use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

use crate::bytes::ByteOrder;

/// Type code of a struct in a type descriptor.
pub const STRUCT_CODE: u64 = 15;
/// Type code of a string in a type descriptor.
pub const STRING_CODE: u64 = 18;
/// Type code of an array in a type descriptor.
pub const ARRAY_CODE: u64 = 20;

/// Scalar element types that can appear in tag data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I16,
    I32,
    U16,
    U32,
    F32,
    F64,
    Bool,
    Char,
    Octet,
    I64,
    U64,
}

impl ElementType {
    /// Map a type code to a scalar type.
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            2 => ElementType::I16,
            3 => ElementType::I32,
            4 => ElementType::U16,
            5 => ElementType::U32,
            6 => ElementType::F32,
            7 => ElementType::F64,
            8 => ElementType::Bool,
            9 => ElementType::Char,
            10 => ElementType::Octet,
            11 => ElementType::I64,
            12 => ElementType::U64,
            _ => return None,
        })
    }

    pub fn code(self) -> u64 {
        match self {
            ElementType::I16 => 2,
            ElementType::I32 => 3,
            ElementType::U16 => 4,
            ElementType::U32 => 5,
            ElementType::F32 => 6,
            ElementType::F64 => 7,
            ElementType::Bool => 8,
            ElementType::Char => 9,
            ElementType::Octet => 10,
            ElementType::I64 => 11,
            ElementType::U64 => 12,
        }
    }

    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            ElementType::Bool | ElementType::Char | ElementType::Octet => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Bool => "bool",
            ElementType::Char => "char",
            ElementType::Octet => "u8",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
        }
    }

    /// Decode one element. `bytes` must hold at least [`ElementType::size`] bytes.
    pub fn decode(self, bytes: &[u8], order: ByteOrder) -> Scalar {
        match order {
            ByteOrder::Big => decode_with::<BigEndian>(self, bytes),
            ByteOrder::Little => decode_with::<LittleEndian>(self, bytes),
        }
    }
}

fn decode_with<E: Endian>(ty: ElementType, bytes: &[u8]) -> Scalar {
    match ty {
        ElementType::I16 => Scalar::Int(E::read_i16(bytes) as i64),
        ElementType::I32 => Scalar::Int(E::read_i32(bytes) as i64),
        ElementType::I64 => Scalar::Int(E::read_i64(bytes)),
        ElementType::Char => Scalar::Int(bytes[0] as i8 as i64),
        ElementType::U16 => Scalar::UInt(E::read_u16(bytes) as u64),
        ElementType::U32 => Scalar::UInt(E::read_u32(bytes) as u64),
        ElementType::U64 => Scalar::UInt(E::read_u64(bytes)),
        ElementType::Octet => Scalar::UInt(bytes[0] as u64),
        ElementType::F32 => Scalar::Float(E::read_f32(bytes) as f64),
        ElementType::F64 => Scalar::Float(E::read_f64(bytes)),
        ElementType::Bool => Scalar::Bool(bytes[0] != 0),
    }
}

/// A decoded scalar value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Value as an unsigned integer, if it is one (or a non-negative integer).
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Scalar::UInt(v) => Some(v),
            Scalar::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 2..=12 {
            let ty = ElementType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert!(ElementType::from_code(STRUCT_CODE).is_none());
        assert!(ElementType::from_code(13).is_none());
    }

    #[test]
    fn test_long_is_four_bytes() {
        assert_eq!(ElementType::I32.size(), 4);
        assert_eq!(ElementType::U32.size(), 4);
    }

    #[test]
    fn test_decode_respects_byte_order() {
        let bytes = 0.5f32.to_le_bytes();
        assert_eq!(
            ElementType::F32.decode(&bytes, ByteOrder::Little),
            Scalar::Float(0.5)
        );
        let bytes = (-2i16).to_be_bytes();
        assert_eq!(ElementType::I16.decode(&bytes, ByteOrder::Big), Scalar::Int(-2));
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Scalar::Int(-1).as_u64(), None);
        assert_eq!(Scalar::Int(7).as_u64(), Some(7));
        assert_eq!(Scalar::Float(2.0).as_u64(), None);
        assert_eq!(Scalar::Bool(true).as_f64(), 1.0);
    }
}
