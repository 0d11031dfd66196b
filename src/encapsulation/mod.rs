//! EtherNet/IP encapsulation layer.
//!
//! Commands, the 24-byte [`header`], the Common Packet Format ([`cpf`]) and
//! the frame builders used by the session.
//!
//! # Example
//!
//! ```
//! use enip_cip::encapsulation::{self, header, Command};
//!
//! let frame = encapsulation::register_session().unwrap();
//! let parsed = header::parse(&frame).unwrap();
//! assert_eq!(parsed.command(), Some(Command::RegisterSession));
//! assert_eq!(parsed.payload, vec![0x01, 0x00, 0x00, 0x00]);
//! ```

pub mod cpf;
pub mod header;

use crate::codec::{Reader, WriteExt};
use crate::error::Result;
pub use cpf::{CpfItem, ItemId};
pub use header::{EncapsulatedFrame, HEADER_SIZE};

/// Default EtherNet/IP TCP and UDP port.
pub const EIP_PORT: u16 = 44818;

/// Encapsulation command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// No operation.
    Nop = 0x00,
    /// List services.
    ListServices = 0x04,
    /// List identity.
    ListIdentity = 0x63,
    /// List interfaces.
    ListInterfaces = 0x64,
    /// Register session.
    RegisterSession = 0x65,
    /// Unregister session.
    UnregisterSession = 0x66,
    /// Send request/reply data (unconnected).
    SendRRData = 0x6F,
    /// Send unit data (connected).
    SendUnitData = 0x70,
    /// Indicate status.
    IndicateStatus = 0x72,
    /// Cancel.
    Cancel = 0x73,
}

impl Command {
    /// Every command, in code order.
    pub const ALL: &'static [Command] = &[
        Command::Nop,
        Command::ListServices,
        Command::ListIdentity,
        Command::ListInterfaces,
        Command::RegisterSession,
        Command::UnregisterSession,
        Command::SendRRData,
        Command::SendUnitData,
        Command::IndicateStatus,
        Command::Cancel,
    ];

    /// Wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a command by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

/// Describes an encapsulation status code.
pub fn status_description(status: u32) -> String {
    match status {
        0x00 => "SUCCESS".to_string(),
        0x01 => "FAIL: Sender issued an invalid encapsulation command.".to_string(),
        0x02 => "FAIL: Insufficient memory resources to handle command.".to_string(),
        0x03 => "FAIL: Poorly formed or incorrect data in encapsulation packet.".to_string(),
        0x64 => "FAIL: Originator used an invalid session handle.".to_string(),
        0x65 => "FAIL: Target received a message of invalid length.".to_string(),
        0x69 => "FAIL: Unsupported encapsulation protocol revision.".to_string(),
        other => format!("FAIL: General failure <{other}> occurred."),
    }
}

/// RegisterSession request: protocol version 1, no options.
pub fn register_session() -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(4);
    data.put_u16_le(0x01);
    data.put_u16_le(0x00);
    header::build(Command::RegisterSession, 0, &data)
}

/// UnregisterSession request.
pub fn unregister_session(session_handle: u32) -> Result<Vec<u8>> {
    header::build(Command::UnregisterSession, session_handle, &[])
}

/// ListIdentity request.
pub fn list_identity() -> Result<Vec<u8>> {
    header::build(Command::ListIdentity, 0, &[])
}

/// ListServices request.
pub fn list_services() -> Result<Vec<u8>> {
    header::build(Command::ListServices, 0, &[])
}

fn interface_prefix(timeout_s: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.put_u32_le(0);
    out.put_u16_le(timeout_s);
    out
}

/// SendRRData request carrying an unconnected CIP message.
///
/// The CPF holds a Null address item and a UCMM data item.
pub fn send_rr_data(session_handle: u32, cip: &[u8], timeout_s: u16) -> Result<Vec<u8>> {
    let mut data = interface_prefix(timeout_s);
    data.extend(cpf::build(&[
        CpfItem::new(ItemId::Null, Vec::new()),
        CpfItem::new(ItemId::Ucmm, cip),
    ])?);
    header::build(Command::SendRRData, session_handle, &data)
}

/// SendUnitData request carrying a connected CIP message.
///
/// The CPF holds the connection id and `{sequence u16, cip}`. The timeout
/// field is always zero.
pub fn send_unit_data(
    session_handle: u32,
    cip: &[u8],
    connection_id: u32,
    sequence: u16,
) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(2 + cip.len());
    packet.put_u16_le(sequence);
    packet.extend_from_slice(cip);

    let mut data = interface_prefix(0);
    data.extend(cpf::build(&[
        CpfItem::new(ItemId::ConnectionBased, connection_id.to_le_bytes().to_vec()),
        CpfItem::new(ItemId::ConnectedTransportPacket, packet),
    ])?);
    header::build(Command::SendUnitData, session_handle, &data)
}

/// Strips the interface handle and timeout from a SendRRData/SendUnitData
/// payload and parses the CPF items that follow.
pub fn parse_data_payload(payload: &[u8]) -> Result<Vec<CpfItem>> {
    let mut r = Reader::new(payload);
    r.skip(6)?;
    cpf::parse(r.rest())
}
