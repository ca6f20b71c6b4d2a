//! Bounds-checked cursor over an in-memory file.
//!
//! Both the DigitalMicrograph parser and the TIFF directory reader work on a
//! whole file loaded into memory; this cursor turns every out-of-bounds read
//! into an error carrying the offset instead of a panic.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ByteOrder::Big => "big-endian",
            ByteOrder::Little => "little-endian",
        }
    }
}

/// Read past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    pub offset: usize,
    pub needed: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $read:ident) => {
        pub fn $name(&mut self, order: ByteOrder) -> Result<$ty, OutOfBounds> {
            let needed = std::mem::size_of::<$ty>();
            self.ensure(needed)?;
            let value = match order {
                ByteOrder::Big => self.cursor.$read::<BigEndian>(),
                ByteOrder::Little => self.cursor.$read::<LittleEndian>(),
            };
            value.map_err(|_| OutOfBounds {
                offset: self.position(),
                needed,
            })
        }
    };
}

/// Sequential reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Reader positioned at `offset`.
    pub fn at(data: &'a [u8], offset: usize) -> Result<Self, OutOfBounds> {
        if offset > data.len() {
            return Err(OutOfBounds { offset, needed: 0 });
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(offset as u64);
        Ok(Self { cursor })
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.position()
    }

    fn ensure(&self, n: usize) -> Result<(), OutOfBounds> {
        if n > self.remaining() {
            return Err(OutOfBounds {
                offset: self.position(),
                needed: n,
            });
        }
        Ok(())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], OutOfBounds> {
        self.ensure(n)?;
        let start = self.position();
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    pub fn u8(&mut self) -> Result<u8, OutOfBounds> {
        self.ensure(1)?;
        self.cursor.read_u8().map_err(|_| OutOfBounds {
            offset: self.position(),
            needed: 1,
        })
    }

    read_int!(u16, u16, read_u16);
    read_int!(u32, u32, read_u32);
    read_int!(u64, u64, read_u64);
}

/// Write `value` into `buf[offset..offset + 4]`.
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32, order: ByteOrder) -> Result<(), OutOfBounds> {
    let slot = offset
        .checked_add(4)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or(OutOfBounds { offset, needed: 4 })?;
    match order {
        ByteOrder::Big => BigEndian::write_u32(slot, value),
        ByteOrder::Little => LittleEndian::write_u32(slot, value),
    }
    Ok(())
}
