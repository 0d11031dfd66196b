//! CIP Message Router request and reply framing.
//!
//! # Request
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Service code |
//! | 1 | 1 | Path size in 16-bit words |
//! | 2 | 2·n | Path, padded to an even length |
//! | … | … | Request data |
//!
//! # Reply
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | Reply service (request service \| 0x80) |
//! | 1 | 1 | Reserved |
//! | 2 | 1 | General status |
//! | 3 | 1 | Extended status size in words |
//! | 4 | 2·n | Extended status |
//! | … | … | Reply data |
//!
//! # Example
//!
//! ```
//! use enip_cip::cip::message_router::{self, services};
//!
//! let request = message_router::build(services::READ_TAG, &[0x91, 0x03, b'f', b'o', b'o', 0x00], &[0x01, 0x00]);
//! assert_eq!(request[0], 0x4C);
//! assert_eq!(request[1], 3);
//!
//! let reply = message_router::parse(&[0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00]).unwrap();
//! assert_eq!(reply.request_service(), services::READ_TAG);
//! assert!(reply.is_success());
//! ```

use crate::codec::{word_len, Reader, WriteExt};
use crate::error::{EnipError, Result};

/// Bit set on the service code of every reply.
pub const REPLY_MASK: u8 = 0x80;

/// CIP service codes.
pub mod services {
    /// Get Attribute All.
    pub const GET_ATTRIBUTE_ALL: u8 = 0x01;
    /// Reset.
    pub const RESET: u8 = 0x05;
    /// Start.
    pub const START: u8 = 0x06;
    /// Stop.
    pub const STOP: u8 = 0x07;
    /// Create.
    pub const CREATE: u8 = 0x08;
    /// Delete.
    pub const DELETE: u8 = 0x09;
    /// Multiple Service Packet.
    pub const MULTIPLE_SERVICE_PACKET: u8 = 0x0A;
    /// Apply Attributes.
    pub const APPLY_ATTRIBUTES: u8 = 0x0D;
    /// Get Attribute Single.
    pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
    /// Set Attribute Single.
    pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
    /// Find Next Object Instance.
    pub const FIND_NEXT: u8 = 0x11;
    /// Read Tag.
    pub const READ_TAG: u8 = 0x4C;
    /// Write Tag.
    pub const WRITE_TAG: u8 = 0x4D;
    /// Read Modify Write Tag.
    pub const READ_MODIFY_WRITE_TAG: u8 = 0x4E;
    /// Read Tag Fragmented. Also the Unconnected Send service at the Connection Manager.
    pub const READ_TAG_FRAGMENTED: u8 = 0x52;
    /// Write Tag Fragmented.
    pub const WRITE_TAG_FRAGMENTED: u8 = 0x53;

    /// Human readable service name, used in timeout and error messages.
    pub fn name(service: u8) -> &'static str {
        match service {
            GET_ATTRIBUTE_ALL => "Get Attribute All",
            RESET => "Reset",
            START => "Start",
            STOP => "Stop",
            CREATE => "Create",
            DELETE => "Delete",
            MULTIPLE_SERVICE_PACKET => "Multiple Service Packet",
            APPLY_ATTRIBUTES => "Apply Attributes",
            GET_ATTRIBUTE_SINGLE => "Get Attribute Single",
            SET_ATTRIBUTE_SINGLE => "Set Attribute Single",
            FIND_NEXT => "Find Next",
            READ_TAG => "Read Tag",
            WRITE_TAG => "Write Tag",
            READ_MODIFY_WRITE_TAG => "Read Modify Write Tag",
            READ_TAG_FRAGMENTED => "Read Tag Fragmented",
            WRITE_TAG_FRAGMENTED => "Write Tag Fragmented",
            crate::cip::connection_manager::FORWARD_OPEN => "Forward Open",
            _ => "Unknown Service",
        }
    }
}

/// Builds a Message Router request.
pub fn build(service: u8, path: &[u8], data: &[u8]) -> Vec<u8> {
    let words = word_len(path.len());
    let mut out = Vec::with_capacity(2 + words * 2 + data.len());
    out.put_u8(service);
    out.put_u8(words as u8);
    out.extend_from_slice(path);
    out.pad_to_even();
    out.extend_from_slice(data);
    out
}

/// A parsed Message Router reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterReply {
    /// Reply service code (request service with the reply bit set).
    pub service: u8,
    /// General status code, 0 on success.
    pub general_status: u8,
    /// Extended status words.
    pub extended_status: Vec<u16>,
    /// Reply data.
    pub data: Vec<u8>,
}

impl MessageRouterReply {
    /// Service code of the request this reply answers.
    pub fn request_service(&self) -> u8 {
        self.service & !REPLY_MASK
    }

    /// Returns whether the general status is 0.
    pub fn is_success(&self) -> bool {
        self.general_status == 0
    }

    /// Converts a non-zero general status into `EnipError::Cip`.
    pub fn check_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self.to_error())
        }
    }

    /// Builds the CIP error describing this reply's status.
    pub fn to_error(&self) -> EnipError {
        EnipError::cip(
            self.request_service(),
            self.general_status,
            self.extended_status.clone(),
        )
    }
}

/// Parses a Message Router reply.
///
/// # Errors
///
/// Returns `EnipError::Framing` when the buffer is shorter than the fixed
/// header plus the announced extended status words.
pub fn parse(buf: &[u8]) -> Result<MessageRouterReply> {
    let mut reader = Reader::new(buf);
    let service = reader.u8()?;
    reader.skip(1)?;
    let general_status = reader.u8()?;
    let ext_count = reader.u8()?;

    let extended_status = (0..ext_count)
        .map(|_| reader.u16())
        .collect::<Result<Vec<_>>>()?;

    Ok(MessageRouterReply {
        service,
        general_status,
        extended_status,
        data: reader.rest().to_vec(),
    })
}

/// Builds the body of a Multiple Service Packet request.
///
/// Layout: service count, one offset per service (relative to the start of
/// this body), then the concatenated service requests.
pub fn build_multiple_service_packet(messages: &[Vec<u8>]) -> Vec<u8> {
    let header_len = 2 + 2 * messages.len();
    let total: usize = messages.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(header_len + total);

    out.put_u16_le(messages.len() as u16);
    let mut offset = header_len;
    for msg in messages {
        out.put_u16_le(offset as u16);
        offset += msg.len();
    }
    for msg in messages {
        out.extend_from_slice(msg);
    }
    out
}

/// Splits the data of a Multiple Service Packet reply into its sub-replies.
///
/// # Errors
///
/// Returns `EnipError::Framing` when the offset table is truncated or points
/// outside the buffer.
pub fn parse_multiple_service_reply(data: &[u8]) -> Result<Vec<MessageRouterReply>> {
    let mut reader = Reader::new(data);
    let count = reader.u16()? as usize;
    let offsets = (0..count)
        .map(|_| reader.u16().map(usize::from))
        .collect::<Result<Vec<_>>>()?;

    let mut replies = Vec::with_capacity(count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start > end || end > data.len() {
            return Err(EnipError::framing(format!(
                "multiple service reply offset {start}..{end} out of range (len {})",
                data.len()
            )));
        }
        replies.push(parse(&data[start..end])?);
    }
    Ok(replies)
}
