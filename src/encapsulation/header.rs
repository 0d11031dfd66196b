//! Encapsulation header.
//!
//! Every EtherNet/IP frame on TCP port 44818 starts with a fixed 24-byte
//! header, little endian:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | Command |
//! | 2 | 2 | Length of the data following the header |
//! | 4 | 4 | Session handle |
//! | 8 | 4 | Status |
//! | 12 | 8 | Sender context |
//! | 20 | 4 | Options |
//!
//! # Example
//!
//! ```
//! use enip_cip::encapsulation::{header, Command};
//!
//! let bytes = header::build(Command::RegisterSession, 0, &[0x01, 0x00, 0x00, 0x00]).unwrap();
//! assert_eq!(bytes.len(), 28);
//!
//! let frame = header::parse(&bytes).unwrap();
//! assert_eq!(frame.command(), Some(Command::RegisterSession));
//! assert_eq!(frame.payload, vec![0x01, 0x00, 0x00, 0x00]);
//! ```

use super::{status_description, Command};
use crate::codec::{Reader, WriteExt};
use crate::error::{EnipError, Result};

/// Encapsulation header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// A parsed encapsulation frame: header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedFrame {
    /// Raw command code.
    pub command_code: u16,
    /// Payload length announced by the header.
    pub length: u16,
    /// Session handle (0 before registration).
    pub session_handle: u32,
    /// Encapsulation status, 0 on success.
    pub status: u32,
    /// Sender context echoed back by the target.
    pub sender_context: [u8; 8],
    /// Options, always 0.
    pub options: u32,
    /// Data following the header.
    pub payload: Vec<u8>,
}

impl EncapsulatedFrame {
    /// Returns the command if its code is known.
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.command_code)
    }

    /// Returns whether the status is 0.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Human readable description of the status.
    pub fn status_message(&self) -> String {
        status_description(self.status)
    }

    /// Sender context as an integer.
    pub fn context(&self) -> u64 {
        u64::from_le_bytes(self.sender_context)
    }

    /// Converts a non-zero status into `EnipError::Encapsulation`.
    pub fn check_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(EnipError::encapsulation(self.status))
        }
    }
}

/// Builds a header followed by `data`, with a zero sender context.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` if `data` exceeds the 16-bit
/// length field.
pub fn build(command: Command, session_handle: u32, data: &[u8]) -> Result<Vec<u8>> {
    build_with_context(command, session_handle, 0, data)
}

/// Builds a header carrying `sender_context`, followed by `data`.
///
/// Status and options are always zero for frames sent by the originator.
pub fn build_with_context(
    command: Command,
    session_handle: u32,
    sender_context: u64,
    data: &[u8],
) -> Result<Vec<u8>> {
    let length = u16::try_from(data.len()).map_err(|_| {
        EnipError::invalid_parameter(
            "data",
            format!("{} bytes exceed the encapsulation length field", data.len()),
        )
    })?;
    let mut out = Vec::with_capacity(HEADER_SIZE + data.len());
    out.put_u16_le(command.code());
    out.put_u16_le(length);
    out.put_u32_le(session_handle);
    out.put_u32_le(0);
    out.extend_from_slice(&sender_context.to_le_bytes());
    out.put_u32_le(0);
    out.extend_from_slice(data);
    Ok(out)
}

/// Overwrites the sender context of an encoded frame.
///
/// # Errors
///
/// Returns `EnipError::Framing` if `frame` is shorter than a header.
pub fn set_sender_context(frame: &mut [u8], sender_context: u64) -> Result<()> {
    let field = frame
        .get_mut(12..20)
        .ok_or_else(|| EnipError::framing("frame shorter than an encapsulation header"))?;
    field.copy_from_slice(&sender_context.to_le_bytes());
    Ok(())
}

/// Builds a header from a raw command code.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` if the code is not a known command.
pub fn build_raw(command_code: u16, session_handle: u32, data: &[u8]) -> Result<Vec<u8>> {
    let command = Command::from_code(command_code).ok_or_else(|| {
        EnipError::invalid_parameter(
            "command",
            format!("0x{command_code:04X} is not an encapsulation command"),
        )
    })?;
    build(command, session_handle, data)
}

/// Parses one frame from the start of `buf`.
///
/// Bytes beyond the announced length are ignored.
///
/// # Errors
///
/// Returns `EnipError::Framing` if `buf` holds fewer than `24 + length` bytes.
pub fn parse(buf: &[u8]) -> Result<EncapsulatedFrame> {
    if buf.len() < HEADER_SIZE {
        return Err(EnipError::framing(format!(
            "encapsulation header too short: expected {} bytes, got {}",
            HEADER_SIZE,
            buf.len()
        )));
    }

    let mut r = Reader::new(buf);
    let command_code = r.u16()?;
    let length = r.u16()?;
    let session_handle = r.u32()?;
    let status = r.u32()?;
    let mut sender_context = [0u8; 8];
    sender_context.copy_from_slice(r.take(8)?);
    let options = r.u32()?;
    let payload = r.take(usize::from(length))?.to_vec();

    Ok(EncapsulatedFrame {
        command_code,
        length,
        session_handle,
        status,
        sender_context,
        options,
        payload,
    })
}

/// Total length of the frame at the start of `buf`, once the header is in.
///
/// Returns `None` while fewer than 24 bytes have been received.
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let length = u16::from_le_bytes([buf[2], buf[3]]);
    Some(HEADER_SIZE + usize::from(length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = build(Command::SendRRData, 0x1A2B_3C4D, &[0xAA, 0xBB]).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x6F, 0x00, 0x02, 0x00, 0x4D, 0x3C, 0x2B, 0x1A, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB,
            ]
        );
    }

    #[test]
    fn test_header_roundtrip_all_commands() {
        for command in Command::ALL {
            let bytes = build(*command, 0x1337, b"payload").unwrap();
            let frame = parse(&bytes).unwrap();
            assert_eq!(frame.command(), Some(*command));
            assert_eq!(frame.session_handle, 0x1337);
            assert_eq!(frame.payload, b"payload");
            assert_eq!(usize::from(frame.length), frame.payload.len());
        }
    }

    #[test]
    fn test_build_rejects_unknown_command() {
        assert!(build_raw(0x65, 0, &[]).is_ok());
        assert!(build_raw(0x99, 0, &[]).is_err());
        assert!(build_raw(0x01, 0, &[]).is_err());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse(&[0x65, 0x00, 0x04]).is_err());

        // header announces 4 bytes, only 2 present
        let mut bytes = build(Command::RegisterSession, 0, &[1, 0, 0, 0]).unwrap();
        bytes.truncate(26);
        assert!(matches!(parse(&bytes), Err(EnipError::Framing { .. })));
    }

    #[test]
    fn test_parse_status() {
        let mut bytes = build(Command::RegisterSession, 0, &[]).unwrap();
        bytes[8] = 0x69;
        let frame = parse(&bytes).unwrap();
        assert!(!frame.is_success());
        assert_eq!(
            frame.status_message(),
            "FAIL: Unsupported encapsulation protocol revision."
        );
        assert!(frame.check_status().is_err());
    }

    #[test]
    fn test_frame_length() {
        let bytes = build(Command::ListIdentity, 0, &[0; 10]).unwrap();
        assert_eq!(frame_length(&bytes[..23]), None);
        assert_eq!(frame_length(&bytes[..24]), Some(34));
    }

    #[test]
    fn test_sender_context_roundtrip() {
        let bytes = build_with_context(Command::SendRRData, 1, 0x0102_0304_0506_0708, &[]).unwrap();
        assert_eq!(&bytes[12..20], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(parse(&bytes).unwrap().context(), 0x0102_0304_0506_0708);

        let mut bytes = build(Command::ListIdentity, 0, &[]).unwrap();
        set_sender_context(&mut bytes, 42).unwrap();
        assert_eq!(parse(&bytes).unwrap().context(), 42);
        assert!(set_sender_context(&mut [0u8; 10], 1).is_err());
    }

    #[test]
    fn test_build_rejects_oversize_data() {
        let data = vec![0u8; usize::from(u16::MAX) + 1];
        assert!(matches!(
            build(Command::SendRRData, 0, &data),
            Err(EnipError::InvalidParameter { .. })
        ));
        assert!(build(Command::SendRRData, 0, &data[1..]).is_ok());
    }
}
