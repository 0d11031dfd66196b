//! Little-endian byte codec primitives.
//!
//! Every layer of the stack is built on these two pieces:
//!
//! - [`Reader`], a bounds-checked cursor over a borrowed buffer. A read past
//!   the end of the buffer yields [`EnipError::Framing`] instead of panicking.
//! - [`WriteExt`], little-endian append helpers for `Vec<u8>`.
//!
//! # Example
//!
//! ```
//! use enip_cip::codec::{Reader, WriteExt};
//!
//! let mut buf = Vec::new();
//! buf.put_u16_le(0x1234);
//! buf.put_u32_le(0xDEADBEEF);
//!
//! let mut reader = Reader::new(&buf);
//! assert_eq!(reader.u16().unwrap(), 0x1234);
//! assert_eq!(reader.u32().unwrap(), 0xDEADBEEF);
//! assert!(reader.is_empty());
//! ```

use crate::error::{EnipError, Result};

/// Bounds-checked little-endian cursor.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.array::<{ std::mem::size_of::<$ty>() }>()?;
            Ok(<$ty>::from_le_bytes(bytes))
        }
    };
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes `n` bytes and returns them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(EnipError::framing(format!(
                "need {} bytes at offset {}, only {} remain",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Consumes and returns everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    read_le!(u8, u8);
    read_le!(i8, i8);
    read_le!(u16, u16);
    read_le!(i16, i16);
    read_le!(u32, u32);
    read_le!(i32, i32);
    read_le!(u64, u64);
    read_le!(i64, i64);
    read_le!(f32, f32);
    read_le!(f64, f64);

    /// Reads a big-endian `u16` (socket address fields use network order).
    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array::<2>()?))
    }
}

/// Little-endian append helpers.
pub trait WriteExt {
    /// Appends a `u8`.
    fn put_u8(&mut self, value: u8);
    /// Appends a little-endian `u16`.
    fn put_u16_le(&mut self, value: u16);
    /// Appends a little-endian `u32`.
    fn put_u32_le(&mut self, value: u32);
    /// Appends a little-endian `i32`.
    fn put_i32_le(&mut self, value: i32);
    /// Appends a zero byte when the length is odd.
    fn pad_to_even(&mut self);
}

impl WriteExt for Vec<u8> {
    #[inline]
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    #[inline]
    fn put_u16_le(&mut self, value: u16) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn put_u32_le(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn put_i32_le(&mut self, value: i32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn pad_to_even(&mut self) {
        if self.len() % 2 == 1 {
            self.push(0x00);
        }
    }
}

/// Number of 16-bit words needed to hold `len` bytes.
#[inline]
pub fn word_len(len: usize) -> usize {
    len.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_short_read_is_framing_error() {
        let mut reader = Reader::new(&[0x01]);
        let err = reader.u16().unwrap_err();
        assert!(matches!(err, EnipError::Framing { .. }));
        // cursor does not move on failure
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.u8().unwrap(), 0x01);
    }

    #[test]
    fn test_reader_signed_and_float() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(-5i16).to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        buf.extend_from_slice(&(-7i64).to_le_bytes());
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.i16().unwrap(), -5);
        assert_eq!(reader.f32().unwrap(), 1.5);
        assert_eq!(reader.i64().unwrap(), -7);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reader_take_rest() {
        let mut reader = Reader::new(&[1, 2, 3, 4, 5]);
        assert_eq!(reader.take(2).unwrap(), &[1, 2]);
        reader.skip(1).unwrap();
        assert_eq!(reader.rest(), &[4, 5]);
        assert!(reader.take(1).is_err());
    }

    #[test]
    fn test_big_endian_u16() {
        let mut reader = Reader::new(&[0xAF, 0x12]);
        assert_eq!(reader.u16_be().unwrap(), 0xAF12);
    }

    #[test]
    fn test_pad_to_even() {
        let mut buf = vec![1, 2, 3];
        buf.pad_to_even();
        assert_eq!(buf, vec![1, 2, 3, 0]);
        buf.pad_to_even();
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_word_len() {
        assert_eq!(word_len(0), 0);
        assert_eq!(word_len(3), 2);
        assert_eq!(word_len(4), 2);
    }
}
