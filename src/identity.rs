//! Device identity records.
//!
//! [`ControllerProperties`] is decoded from a Get Attribute All reply of the
//! Identity object (class 0x01, instance 1). [`DeviceIdentity`] and
//! [`ServiceInfo`] are decoded from ListIdentity and ListServices replies.

use std::net::{Ipv4Addr, SocketAddrV4};

use chrono::{DateTime, Utc};

use crate::codec::Reader;
use crate::error::Result;
use crate::utils::extract_bits;

/// Identity object class.
pub const IDENTITY_CLASS: u32 = 0x01;

const MINOR_RECOVERABLE: u16 = 0x0100;
const MINOR_UNRECOVERABLE: u16 = 0x0200;
const MAJOR_RECOVERABLE: u16 = 0x0400;
const MAJOR_UNRECOVERABLE: u16 = 0x0800;
const IO_FAULTED_STATE: u32 = 2;

/// Fault flags decoded from the Identity status word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaultStatus {
    /// Any fault bit set.
    pub faulted: bool,
    /// Minor recoverable fault.
    pub minor_recoverable: bool,
    /// Minor unrecoverable fault.
    pub minor_unrecoverable: bool,
    /// Major recoverable fault.
    pub major_recoverable: bool,
    /// Major unrecoverable fault.
    pub major_unrecoverable: bool,
    /// Extended device status reports faulted I/O.
    pub io_faulted: bool,
}

impl FaultStatus {
    /// Decodes the fault bits of an Identity status word.
    pub fn from_status(status: u16) -> Self {
        Self {
            faulted: status & 0x0F00 != 0,
            minor_recoverable: status & MINOR_RECOVERABLE != 0,
            minor_unrecoverable: status & MINOR_UNRECOVERABLE != 0,
            major_recoverable: status & MAJOR_RECOVERABLE != 0,
            major_unrecoverable: status & MAJOR_UNRECOVERABLE != 0,
            io_faulted: extract_bits(u32::from(status), 8, 11) == IO_FAULTED_STATE,
        }
    }
}

/// Identity attributes shared by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentityAttributes {
    /// Vendor id.
    pub vendor_id: u16,
    /// Device type.
    pub device_type: u16,
    /// Product code.
    pub product_code: u16,
    /// Firmware major revision.
    pub major_revision: u8,
    /// Firmware minor revision.
    pub minor_revision: u8,
    /// Raw status word.
    pub status: u16,
    /// Serial number.
    pub serial_number: u32,
    /// Product name.
    pub product_name: String,
}

impl IdentityAttributes {
    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let vendor_id = r.u16()?;
        let device_type = r.u16()?;
        let product_code = r.u16()?;
        let major_revision = r.u8()?;
        let minor_revision = r.u8()?;
        let status = r.u16()?;
        let serial_number = r.u32()?;
        let name_len = usize::from(r.u8()?);
        let product_name = String::from_utf8_lossy(r.take(name_len)?).into_owned();
        Ok(Self {
            vendor_id,
            device_type,
            product_code,
            major_revision,
            minor_revision,
            status,
            serial_number,
            product_name,
        })
    }

    /// Firmware revision as `major.minor`.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major_revision, self.minor_revision)
    }

    /// Decoded fault flags.
    pub fn faults(&self) -> FaultStatus {
        FaultStatus::from_status(self.status)
    }
}

/// Controller identity and state as seen by the client.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerProperties {
    /// Identity attributes.
    pub identity: IdentityAttributes,
    /// Fault flags decoded from the status word.
    pub faults: FaultStatus,
    /// Backplane slot the controller sits in.
    pub slot: u8,
    /// Controller wall clock on the last read.
    pub time: Option<DateTime<Utc>>,
}

impl ControllerProperties {
    /// Decodes the data of a Get Attribute All reply from the Identity object.
    ///
    /// # Example
    ///
    /// ```
    /// use enip_cip::identity::ControllerProperties;
    ///
    /// let mut data = vec![0x01, 0x00, 0x0E, 0x00, 0x36, 0x00, 20, 11];
    /// data.extend_from_slice(&[0x60, 0x30, 0x78, 0x56, 0x34, 0x12, 4]);
    /// data.extend_from_slice(b"L85E");
    /// let props = ControllerProperties::parse(&data, 0).unwrap();
    /// assert_eq!(props.identity.serial_number, 0x1234_5678);
    /// assert_eq!(props.identity.version(), "20.11");
    /// assert_eq!(props.identity.product_name, "L85E");
    /// ```
    pub fn parse(data: &[u8], slot: u8) -> Result<Self> {
        let identity = IdentityAttributes::read(&mut Reader::new(data))?;
        Ok(Self {
            faults: identity.faults(),
            identity,
            slot,
            time: None,
        })
    }
}

/// One device answering ListIdentity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    /// Encapsulation protocol version.
    pub encapsulation_version: u16,
    /// Socket address the device reports.
    pub socket_address: SocketAddrV4,
    /// Identity attributes.
    pub identity: IdentityAttributes,
    /// Device state.
    pub state: u8,
}

impl DeviceIdentity {
    /// Decodes the payload of a ListIdentity reply.
    ///
    /// Layout: item count, item type, item length, encapsulation version,
    /// the socket address (family and port big endian, 4 address bytes and
    /// 8 zero bytes), identity attributes, state.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        r.skip(6)?;
        let encapsulation_version = r.u16()?;
        let _family = r.u16_be()?;
        let port = r.u16_be()?;
        let ip = r.take(4)?;
        let ip = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
        r.skip(8)?;
        let identity = IdentityAttributes::read(&mut r)?;
        let state = r.u8()?;
        Ok(Self {
            encapsulation_version,
            socket_address: SocketAddrV4::new(ip, port),
            identity,
            state,
        })
    }
}

/// One service answering ListServices.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceInfo {
    /// CPF item type.
    pub type_id: u16,
    /// Item length.
    pub item_length: u16,
    /// Encapsulation protocol version.
    pub encapsulation_version: u16,
    /// Capability flags.
    pub capabilities: u16,
    /// Service name.
    pub name: String,
}

impl ServiceInfo {
    /// Supports CIP over TCP.
    pub const CAPABILITY_TCP: u16 = 0x0020;
    /// Supports class 0/1 UDP I/O.
    pub const CAPABILITY_UDP: u16 = 0x0100;

    /// Decodes the payload of a ListServices reply.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        r.skip(2)?;
        let type_id = r.u16()?;
        let item_length = r.u16()?;
        let encapsulation_version = r.u16()?;
        let capabilities = r.u16()?;
        let name = String::from_utf8_lossy(r.rest())
            .trim_end_matches('\0')
            .to_string();
        Ok(Self {
            type_id,
            item_length,
            encapsulation_version,
            capabilities,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_bytes(status: u16) -> Vec<u8> {
        let mut out = vec![0x01, 0x00, 0x0E, 0x00, 0x36, 0x00, 32, 11];
        out.extend_from_slice(&status.to_le_bytes());
        out.extend_from_slice(&0xC0FF_EE00u32.to_le_bytes());
        out.push(9);
        out.extend_from_slice(b"1756-L85E");
        out
    }

    #[test]
    fn test_controller_properties() {
        let props = ControllerProperties::parse(&identity_bytes(0x0060), 3).unwrap();
        assert_eq!(props.identity.vendor_id, 1);
        assert_eq!(props.identity.device_type, 0x0E);
        assert_eq!(props.identity.product_code, 0x36);
        assert_eq!(props.identity.version(), "32.11");
        assert_eq!(props.identity.serial_number, 0xC0FF_EE00);
        assert_eq!(props.identity.product_name, "1756-L85E");
        assert_eq!(props.slot, 3);
        assert_eq!(props.faults, FaultStatus::default());
    }

    #[test]
    fn test_fault_bits() {
        let f = FaultStatus::from_status(0x0100);
        assert!(f.faulted && f.minor_recoverable && !f.minor_unrecoverable);

        let f = FaultStatus::from_status(0x0A00);
        assert!(f.minor_unrecoverable && f.major_unrecoverable);
        assert!(!f.io_faulted);

        let f = FaultStatus::from_status(0x0200);
        assert!(f.io_faulted);
    }

    #[test]
    fn test_truncated_identity() {
        let mut bytes = identity_bytes(0);
        bytes.truncate(bytes.len() - 2);
        assert!(ControllerProperties::parse(&bytes, 0).is_err());
    }

    #[test]
    fn test_list_identity() {
        let mut payload = vec![0x01, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00];
        payload.extend_from_slice(&[0x00, 0x02, 0xAF, 0x12, 192, 168, 1, 10]);
        payload.extend_from_slice(&[0; 8]);
        payload.extend(identity_bytes(0x0030));
        payload.push(0x03);

        let device = DeviceIdentity::parse(&payload).unwrap();
        assert_eq!(device.encapsulation_version, 1);
        assert_eq!(
            device.socket_address,
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 44818)
        );
        assert_eq!(device.identity.product_name, "1756-L85E");
        assert_eq!(device.state, 3);
    }

    #[test]
    fn test_list_services() {
        let mut payload = vec![0x01, 0x00, 0x00, 0x01, 0x14, 0x00, 0x01, 0x00, 0x20, 0x01];
        payload.extend_from_slice(b"Communications\0\0");
        let service = ServiceInfo::parse(&payload).unwrap();
        assert_eq!(service.type_id, 0x0100);
        assert_eq!(service.item_length, 0x14);
        assert_eq!(service.capabilities, 0x0120);
        assert_eq!(service.name, "Communications");
        assert_ne!(service.capabilities & ServiceInfo::CAPABILITY_TCP, 0);
    }
}
