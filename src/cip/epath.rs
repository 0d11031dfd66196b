//! EPATH segment builders.
//!
//! An EPATH addresses a CIP object, attribute, or tag element. It is a
//! concatenation of typed segments:
//!
//! | Segment | First byte | Payload |
//! |---------|------------|---------|
//! | Port | `0x00 \| port` (`0x0F` = extended) | link address |
//! | Logical | `0x20 \| type \| format` | 1, 2 or 4 byte value |
//! | Symbolic (ANSI extended) | `0x91` | length, ASCII name |
//! | Symbolic (simple) | `0x80` | length in words, ASCII name |
//! | Element | `0x28` / `0x29` / `0x2A` | 1, 2 or 4 byte index |
//!
//! Everything built here uses the padded EPATH style: multi-byte values are
//! preceded by a pad byte and every segment has an even length.
//!
//! # Example
//!
//! ```
//! use enip_cip::cip::epath::EPath;
//!
//! // Message Router object, class 0x02 instance 1
//! let path = EPath::new().class(0x02).instance(0x01).into_bytes();
//! assert_eq!(path, vec![0x20, 0x02, 0x24, 0x01]);
//! ```

use crate::codec::WriteExt;
use crate::error::{EnipError, Result};

const LOGICAL_SEGMENT: u8 = 1 << 5;
const PORT_EXTENDED: u8 = 0x0F;
const PORT_LINK_EXTENDED: u8 = 0x10;

/// Symbolic segment, ANSI extended encoding.
pub const SYMBOLIC_ANSI: u8 = 0x91;
/// Symbolic segment, simple encoding.
pub const SYMBOLIC_SIMPLE: u8 = 0x80;
/// Element segment with a 1 byte index.
pub const ELEMENT_U8: u8 = 0x28;
/// Element segment with a 2 byte index.
pub const ELEMENT_U16: u8 = 0x29;
/// Element segment with a 4 byte index.
pub const ELEMENT_U32: u8 = 0x2A;

/// Logical segment type (bits 2..=4 of the segment byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogicalType {
    /// Class ID.
    ClassId = 0 << 2,
    /// Instance ID.
    InstanceId = 1 << 2,
    /// Member ID.
    MemberId = 2 << 2,
    /// Connection point.
    ConnPoint = 3 << 2,
    /// Attribute ID.
    AttributeId = 4 << 2,
    /// Special.
    Special = 5 << 2,
    /// Service ID.
    ServiceId = 6 << 2,
}

/// Builds a logical segment.
///
/// The value format follows its magnitude: up to `0xFF` uses one byte, up to
/// `0xFFFF` two bytes, anything larger four bytes. With `padded`, a reserved
/// byte sits between the segment byte and a multi-byte value.
///
/// # Example
///
/// ```
/// use enip_cip::cip::epath::{logical, LogicalType};
///
/// assert_eq!(logical(LogicalType::InstanceId, 500, true), vec![0x25, 0x00, 0xF4, 0x01]);
/// assert_eq!(logical(LogicalType::InstanceId, 500, false), vec![0x25, 0xF4, 0x01]);
/// ```
pub fn logical(ty: LogicalType, value: u32, padded: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    if value <= 0xFF {
        out.put_u8(LOGICAL_SEGMENT | ty as u8);
        out.put_u8(value as u8);
    } else if value <= 0xFFFF {
        out.put_u8(LOGICAL_SEGMENT | ty as u8 | 0x01);
        if padded {
            out.put_u8(0x00);
        }
        out.put_u16_le(value as u16);
    } else {
        out.put_u8(LOGICAL_SEGMENT | ty as u8 | 0x02);
        if padded {
            out.put_u8(0x00);
        }
        out.put_u32_le(value);
    }
    out
}

/// Link address of a port segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortLink {
    /// Single byte link address, such as a backplane slot.
    Node(u8),
    /// Textual link address, such as `"192.168.1.10"`.
    Address(String),
}

impl From<u8> for PortLink {
    fn from(value: u8) -> Self {
        PortLink::Node(value)
    }
}

impl From<&str> for PortLink {
    fn from(value: &str) -> Self {
        PortLink::Address(value.to_string())
    }
}

/// Builds a port segment.
///
/// Ports of 15 and above use the extended form (`0x0F` followed by the port as
/// a `u16`). Links longer than one byte set the `0x10` flag and carry the link
/// length. The result is padded to an even length.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` for port 0 or an empty/oversized
/// textual link.
///
/// # Example
///
/// ```
/// use enip_cip::cip::epath::port;
///
/// // Backplane, slot 0
/// assert_eq!(port(1, &0u8.into()).unwrap(), vec![0x01, 0x00]);
/// ```
pub fn port(port: u16, link: &PortLink) -> Result<Vec<u8>> {
    if port == 0 {
        return Err(EnipError::invalid_parameter(
            "port",
            "port number must be positive",
        ));
    }

    let link_bytes: Vec<u8> = match link {
        PortLink::Node(node) => vec![*node],
        PortLink::Address(addr) => {
            if addr.is_empty() || addr.len() > 0xFF || !addr.is_ascii() {
                return Err(EnipError::invalid_parameter(
                    "link",
                    format!("invalid link address '{addr}'"),
                ));
            }
            addr.as_bytes().to_vec()
        }
    };

    let mut segment = if port < 15 { port as u8 } else { PORT_EXTENDED };
    let wide_link = link_bytes.len() > 1;
    if wide_link {
        segment |= PORT_LINK_EXTENDED;
    }

    let mut out = Vec::with_capacity(4 + link_bytes.len());
    out.put_u8(segment);
    if wide_link {
        out.put_u8(link_bytes.len() as u8);
    }
    if port >= 15 {
        out.put_u16_le(port);
    }
    out.extend_from_slice(&link_bytes);
    out.pad_to_even();
    Ok(out)
}

/// Builds an element segment, choosing the index width by magnitude.
///
/// # Example
///
/// ```
/// use enip_cip::cip::epath::element;
///
/// assert_eq!(element(255), vec![0x28, 0xFF]);
/// assert_eq!(element(256), vec![0x29, 0x00, 0x00, 0x01]);
/// ```
pub fn element(index: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    if index <= 0xFF {
        out.put_u8(ELEMENT_U8);
        out.put_u8(index as u8);
    } else if index <= 0xFFFF {
        out.put_u8(ELEMENT_U16);
        out.put_u8(0x00);
        out.put_u16_le(index as u16);
    } else {
        out.put_u8(ELEMENT_U32);
        out.put_u8(0x00);
        out.put_u32_le(index);
    }
    out
}

/// Builds a symbolic segment for `name`.
///
/// With `ansi` the ANSI extended form is used (length in bytes), otherwise
/// the simple form (length in words).
pub fn symbolic(name: &str, ansi: bool) -> Result<Vec<u8>> {
    if name.is_empty() {
        return Err(EnipError::invalid_parameter("symbol", "symbol must not be empty"));
    }
    if !name.is_ascii() || name.len() > 0xFF {
        return Err(EnipError::invalid_parameter(
            "symbol",
            format!("'{name}' is not an ASCII symbol of at most 255 bytes"),
        ));
    }

    let mut out = Vec::with_capacity(2 + name.len() + 1);
    if ansi {
        out.put_u8(SYMBOLIC_ANSI);
        out.put_u8(name.len() as u8);
    } else {
        out.put_u8(SYMBOLIC_SIMPLE);
        out.put_u8(crate::codec::word_len(name.len()) as u8);
    }
    out.extend_from_slice(name.as_bytes());
    out.pad_to_even();
    Ok(out)
}

/// Builds a data segment.
///
/// A value made of decimal digits becomes an element segment; anything else
/// becomes a symbolic segment.
///
/// # Example
///
/// ```
/// use enip_cip::cip::epath::data;
///
/// assert_eq!(data("12", true).unwrap(), vec![0x28, 0x0C]);
/// assert_eq!(data("tag", true).unwrap(), vec![0x91, 0x03, b't', b'a', b'g', 0x00]);
/// ```
pub fn data(value: &str, ansi: bool) -> Result<Vec<u8>> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let index: u32 = value.parse().map_err(|_| {
            EnipError::invalid_parameter("element", format!("index {value} exceeds 32 bits"))
        })?;
        return Ok(element(index));
    }
    symbolic(value, ansi)
}

/// Incremental EPATH builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EPath {
    bytes: Vec<u8>,
}

impl EPath {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a logical segment of `ty`.
    pub fn logical(mut self, ty: LogicalType, value: u32) -> Self {
        self.bytes.extend(logical(ty, value, true));
        self
    }

    /// Appends a class segment.
    pub fn class(self, class: u32) -> Self {
        self.logical(LogicalType::ClassId, class)
    }

    /// Appends an instance segment.
    pub fn instance(self, instance: u32) -> Self {
        self.logical(LogicalType::InstanceId, instance)
    }

    /// Appends an attribute segment.
    pub fn attribute(self, attribute: u32) -> Self {
        self.logical(LogicalType::AttributeId, attribute)
    }

    /// Appends a port segment.
    pub fn port(mut self, port_number: u16, link: impl Into<PortLink>) -> Result<Self> {
        self.bytes.extend(port(port_number, &link.into())?);
        Ok(self)
    }

    /// Appends a data segment.
    pub fn data(mut self, value: &str) -> Result<Self> {
        self.bytes.extend(data(value, true)?);
        Ok(self)
    }

    /// Appends raw, already encoded segments.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the builder and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
