//! Common Packet Format.
//!
//! `{item_count u16, items…}` where each item is `{type_id u16, length u16, data}`.

use crate::codec::{Reader, WriteExt};
use crate::error::{EnipError, Result};

/// Known CPF item type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ItemId {
    /// Null address item.
    Null = 0x0000,
    /// ListIdentity response item.
    ListIdentity = 0x000C,
    /// Connected address item.
    ConnectionBased = 0x00A1,
    /// Connected data item.
    ConnectedTransportPacket = 0x00B1,
    /// Unconnected data item.
    Ucmm = 0x00B2,
    /// ListServices response item.
    ListServices = 0x0100,
    /// Socket address, originator to target.
    SockaddrO2T = 0x8000,
    /// Socket address, target to originator.
    SockaddrT2O = 0x8001,
    /// Sequenced address item.
    SequencedAddrItem = 0x8002,
}

impl ItemId {
    /// Looks up an item id by its code.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0000 => ItemId::Null,
            0x000C => ItemId::ListIdentity,
            0x00A1 => ItemId::ConnectionBased,
            0x00B1 => ItemId::ConnectedTransportPacket,
            0x00B2 => ItemId::Ucmm,
            0x0100 => ItemId::ListServices,
            0x8000 => ItemId::SockaddrO2T,
            0x8001 => ItemId::SockaddrT2O,
            0x8002 => ItemId::SequencedAddrItem,
            _ => return None,
        })
    }
}

/// One CPF item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
    /// Item type id.
    pub type_id: u16,
    /// Item data.
    pub data: Vec<u8>,
}

impl CpfItem {
    /// Creates an item of a known type.
    pub fn new(type_id: ItemId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            type_id: type_id as u16,
            data: data.into(),
        }
    }

    /// Returns the item id if known.
    pub fn item_id(&self) -> Option<ItemId> {
        ItemId::from_code(self.type_id)
    }
}

/// Serializes a list of items.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` for an unknown type id or an item
/// longer than 65535 bytes.
pub fn build(items: &[CpfItem]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + items.iter().map(|i| 4 + i.data.len()).sum::<usize>());
    out.put_u16_le(items.len() as u16);
    for item in items {
        if item.item_id().is_none() {
            return Err(EnipError::invalid_parameter(
                "type_id",
                format!("0x{:04X} is not a CPF item id", item.type_id),
            ));
        }
        if item.data.len() > u16::MAX as usize {
            return Err(EnipError::invalid_parameter(
                "data",
                "CPF item exceeds 65535 bytes",
            ));
        }
        out.put_u16_le(item.type_id);
        out.put_u16_le(item.data.len() as u16);
        out.extend_from_slice(&item.data);
    }
    Ok(out)
}

/// Parses a CPF buffer.
pub fn parse(buf: &[u8]) -> Result<Vec<CpfItem>> {
    let mut r = Reader::new(buf);
    let count = r.u16()?;
    (0..count)
        .map(|_| {
            let type_id = r.u16()?;
            let length = r.u16()?;
            let data = r.take(usize::from(length))?.to_vec();
            Ok(CpfItem { type_id, data })
        })
        .collect()
}

/// Returns the data of the first item of type `id`.
pub fn find(items: &[CpfItem], id: ItemId) -> Option<&[u8]> {
    items
        .iter()
        .find(|item| item.type_id == id as u16)
        .map(|item| item.data.as_slice())
}
