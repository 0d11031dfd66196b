//! Elementary templates.
//!
//! Each atomic type reads and writes its value directly at a bit offset in a
//! buffer. All types except BOOL must sit on a byte boundary.

use crate::cip::DataType;
use crate::error::{EnipError, Result};
use crate::value::TagValue;

/// Elementary type with a direct wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Atomic {
    /// `BOOL`, one bit.
    Bool,
    /// `SINT`.
    Sint,
    /// `INT`.
    Int,
    /// `DINT`.
    Dint,
    /// `LINT`.
    Lint,
    /// `USINT`.
    Usint,
    /// `UINT`.
    Uint,
    /// `UDINT`.
    Udint,
    /// `REAL`.
    Real,
    /// `LREAL`.
    Lreal,
    /// `DWORD` (also used for `BIT_STRING` words).
    Dword,
}

/// Layout of an atomic type, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicLayout {
    /// Size.
    pub size: usize,
    /// Alignment.
    pub alignment: usize,
    /// Alignment when following a member of the same type.
    pub consecutive_alignment: usize,
    /// Multiple the enclosing structure size is rounded to.
    pub size_multiple: usize,
}

impl Atomic {
    /// Every atomic type.
    pub const ALL: [Atomic; 11] = [
        Atomic::Bool,
        Atomic::Sint,
        Atomic::Int,
        Atomic::Dint,
        Atomic::Lint,
        Atomic::Usint,
        Atomic::Uint,
        Atomic::Udint,
        Atomic::Real,
        Atomic::Lreal,
        Atomic::Dword,
    ];

    /// CIP type code.
    pub fn data_type(self) -> DataType {
        match self {
            Atomic::Bool => DataType::BOOL,
            Atomic::Sint => DataType::SINT,
            Atomic::Int => DataType::INT,
            Atomic::Dint => DataType::DINT,
            Atomic::Lint => DataType::LINT,
            Atomic::Usint => DataType::USINT,
            Atomic::Uint => DataType::UINT,
            Atomic::Udint => DataType::UDINT,
            Atomic::Real => DataType::REAL,
            Atomic::Lreal => DataType::LREAL,
            Atomic::Dword => DataType::DWORD,
        }
    }

    /// Atomic type carried under a CIP type code.
    pub fn from_data_type(ty: DataType) -> Option<Self> {
        Some(match ty {
            DataType::BOOL => Atomic::Bool,
            DataType::SINT => Atomic::Sint,
            DataType::INT => Atomic::Int,
            DataType::DINT => Atomic::Dint,
            DataType::LINT => Atomic::Lint,
            DataType::USINT => Atomic::Usint,
            DataType::UINT => Atomic::Uint,
            DataType::UDINT => Atomic::Udint,
            DataType::REAL => Atomic::Real,
            DataType::LREAL => Atomic::Lreal,
            DataType::DWORD | DataType::BIT_STRING => Atomic::Dword,
            _ => return None,
        })
    }

    /// Bit layout.
    pub fn layout(self) -> AtomicLayout {
        let (size, alignment, consecutive_alignment, size_multiple) = match self {
            Atomic::Bool => (1, 8, 1, 32),
            Atomic::Sint | Atomic::Usint => (8, 8, 8, 32),
            Atomic::Int | Atomic::Uint => (16, 16, 16, 32),
            Atomic::Dint | Atomic::Udint | Atomic::Real | Atomic::Dword => (32, 32, 32, 32),
            Atomic::Lint | Atomic::Lreal => (64, 64, 64, 64),
        };
        AtomicLayout {
            size,
            alignment,
            consecutive_alignment,
            size_multiple,
        }
    }

    /// Bytes one element occupies on the wire.
    pub fn wire_size(self) -> usize {
        match self {
            Atomic::Bool => 1,
            other => other.layout().size / 8,
        }
    }

    fn byte_range(self, buf_len: usize, offset_bits: usize) -> Result<std::ops::Range<usize>> {
        if self != Atomic::Bool && offset_bits % 8 != 0 {
            return Err(EnipError::framing(format!(
                "{:?} at bit offset {offset_bits} is not byte aligned",
                self
            )));
        }
        let start = offset_bits / 8;
        let end = start + self.wire_size();
        if end > buf_len {
            return Err(EnipError::framing(format!(
                "{:?} at byte {start} overruns a {buf_len} byte buffer",
                self
            )));
        }
        Ok(start..end)
    }

    /// Writes `value` into `buf` at `offset_bits`.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::InvalidParameter` when the value does not fit the
    /// type, and `EnipError::Framing` when the buffer is too small.
    pub fn serialize(self, value: &TagValue, buf: &mut [u8], offset_bits: usize) -> Result<()> {
        let range = self.byte_range(buf.len(), offset_bits)?;
        let mismatch = || {
            EnipError::invalid_parameter(
                "value",
                format!("{value} cannot be written as {}", self.data_type()),
            )
        };
        let target = &mut buf[range];

        match self {
            Atomic::Bool => {
                let bit = offset_bits % 8;
                let on = value.as_bool().ok_or_else(mismatch)?;
                if on {
                    target[0] |= 1 << bit;
                } else {
                    target[0] &= !(1 << bit);
                }
            }
            Atomic::Real => {
                let v = value.as_f64().ok_or_else(mismatch)? as f32;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Lreal => {
                let v = value.as_f64().ok_or_else(mismatch)?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Sint => {
                let v = i8::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Int => {
                let v = i16::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Dint => {
                let v = i32::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Lint => {
                let v = value.as_i64().ok_or_else(mismatch)?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Usint => {
                let v = u8::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Uint => {
                let v = u16::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
            Atomic::Udint | Atomic::Dword => {
                let v = u32::try_from(value.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                target.copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Reads a value from `buf` at `offset_bits`.
    pub fn deserialize(self, buf: &[u8], offset_bits: usize) -> Result<TagValue> {
        let range = self.byte_range(buf.len(), offset_bits)?;
        let b = &buf[range];
        Ok(match self {
            Atomic::Bool => TagValue::Bool(b[0] & (1 << (offset_bits % 8)) != 0),
            Atomic::Sint => TagValue::Sint(i8::from_le_bytes([b[0]])),
            Atomic::Int => TagValue::Int(i16::from_le_bytes([b[0], b[1]])),
            Atomic::Dint => TagValue::Dint(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Atomic::Lint => TagValue::Lint(i64::from_le_bytes(to_array(b))),
            Atomic::Usint => TagValue::Usint(b[0]),
            Atomic::Uint => TagValue::Uint(u16::from_le_bytes([b[0], b[1]])),
            Atomic::Udint => TagValue::Udint(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Atomic::Real => TagValue::Real(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Atomic::Lreal => TagValue::Lreal(f64::from_le_bytes(to_array(b))),
            Atomic::Dword => TagValue::Dword(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        })
    }
}

fn to_array(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&b[..8]);
    out
}
