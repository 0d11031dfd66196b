//! Connection Manager services: Forward Open and Forward Close.
//!
//! A Forward Open sets up a Class 3 (explicit, connected) messaging
//! connection. The controller answers with the connection ids that must then
//! be used in every `SendUnitData` frame; a Forward Close tears it down.
//!
//! # Example
//!
//! ```
//! use enip_cip::cip::connection_manager::{build_forward_open, ForwardOpenParams};
//!
//! let block = build_forward_open(&ForwardOpenParams::default()).unwrap();
//! assert_eq!(block.len(), 35);
//! assert_eq!(block[34], 0xA3);
//! ```

use crate::cip::epath::EPath;
use crate::cip::message_router;
use crate::cip::unconnected_send::{generate_encoded_timeout, CONNECTION_MANAGER_CLASS};
use crate::codec::{word_len, Reader, WriteExt};
use crate::error::{EnipError, Result};

/// Forward Open service code.
pub const FORWARD_OPEN: u8 = 0x54;
/// Forward Close service code.
pub const FORWARD_CLOSE: u8 = 0x4E;

/// Placeholder O→T connection id, replaced by the controller's choice.
pub const O_T_CONNECTION_ID: u32 = 0x1111_1111;
/// Placeholder T→O connection id.
pub const T_O_CONNECTION_ID: u32 = 0x2222_2222;
/// Connection serial number used for every connection this client opens.
pub const CONNECTION_SERIAL: u16 = 0x4242;
/// Default originator vendor id.
pub const DEFAULT_VENDOR_ID: u16 = 0x3333;
/// Default originator serial number.
pub const DEFAULT_ORIGINATOR_SERIAL: u32 = 0x1337;
/// Smallest requested packet interval accepted, in microseconds.
pub const MIN_RPI_US: u32 = 8000;
/// Default network connection parameters: point-to-point, low priority, variable, 500 bytes.
pub const DEFAULT_CONNECTION_PARAMS: u16 = 0x43F4;
/// Transport class 3, server, application triggered.
pub const TRANSPORT_CLASS_TRIGGER: u8 = 0xA3;

/// Timeout multiplier table: multiplier → wire code.
pub const TIMEOUT_MULTIPLIERS: [(u32, u32); 8] = [
    (4, 0),
    (8, 1),
    (16, 2),
    (32, 3),
    (64, 4),
    (128, 5),
    (256, 6),
    (512, 7),
];

/// Looks up the wire code of a timeout multiplier.
pub fn timeout_multiplier_code(multiplier: u32) -> Option<u32> {
    TIMEOUT_MULTIPLIERS
        .iter()
        .find(|(m, _)| *m == multiplier)
        .map(|(_, code)| *code)
}

/// Connection type field of the network connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Null connection.
    Null = 0,
    /// Multicast.
    Multicast = 1,
    /// Point-to-point.
    PointToPoint = 2,
}

/// Priority field of the network connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPriority {
    /// Low.
    Low = 0,
    /// High.
    High = 1,
    /// Scheduled.
    Scheduled = 2,
    /// Urgent.
    Urgent = 3,
}

/// Packs the 16-bit network connection parameter word.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` when `size` exceeds 9 bits.
///
/// # Example
///
/// ```
/// use enip_cip::cip::connection_manager::{
///     build_connection_parameters, ConnectionPriority, ConnectionType,
/// };
///
/// let word = build_connection_parameters(
///     false,
///     ConnectionType::PointToPoint,
///     ConnectionPriority::Low,
///     true,
///     500,
/// )
/// .unwrap();
/// assert_eq!(word, 0x43F4);
/// ```
pub fn build_connection_parameters(
    redundant_owner: bool,
    connection_type: ConnectionType,
    priority: ConnectionPriority,
    variable_size: bool,
    size: u16,
) -> Result<u16> {
    if size > 0x1FF {
        return Err(EnipError::invalid_parameter(
            "size",
            format!("connection size {size} exceeds 511 bytes"),
        ));
    }
    let mut word = size;
    word |= u16::from(variable_size) << 9;
    word |= (priority as u16) << 10;
    word |= (connection_type as u16) << 13;
    word |= u16::from(redundant_owner) << 15;
    Ok(word)
}

/// Parameters of a Forward Open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOpenParams {
    /// Request timeout in milliseconds (must exceed 900).
    pub timeout_ms: u32,
    /// Connection timeout multiplier (4, 8, 16 … 512).
    pub timeout_multiplier: u32,
    /// Originator vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
    /// Requested packet interval in microseconds, both directions.
    pub rpi_us: u32,
    /// O→T network connection parameters.
    pub o_t_params: u16,
    /// T→O network connection parameters.
    pub t_o_params: u16,
}

impl Default for ForwardOpenParams {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            timeout_multiplier: 32,
            vendor_id: DEFAULT_VENDOR_ID,
            originator_serial: DEFAULT_ORIGINATOR_SERIAL,
            rpi_us: MIN_RPI_US,
            o_t_params: DEFAULT_CONNECTION_PARAMS,
            t_o_params: DEFAULT_CONNECTION_PARAMS,
        }
    }
}

fn validate_originator(timeout_ms: u32, vendor_id: u16, originator_serial: u32) -> Result<()> {
    if timeout_ms <= 900 {
        return Err(EnipError::invalid_parameter(
            "timeout_ms",
            format!("{timeout_ms}ms must be greater than 900ms"),
        ));
    }
    if vendor_id == 0 {
        return Err(EnipError::invalid_parameter(
            "vendor_id",
            "vendor id must be positive",
        ));
    }
    if originator_serial == 0 {
        return Err(EnipError::invalid_parameter(
            "originator_serial",
            "originator serial must be positive",
        ));
    }
    Ok(())
}

/// Builds the 35-byte Forward Open parameter block.
pub fn build_forward_open(params: &ForwardOpenParams) -> Result<Vec<u8>> {
    validate_originator(params.timeout_ms, params.vendor_id, params.originator_serial)?;
    let multiplier = timeout_multiplier_code(params.timeout_multiplier).ok_or_else(|| {
        EnipError::invalid_parameter(
            "timeout_multiplier",
            format!("{} is not one of 4, 8, 16 … 512", params.timeout_multiplier),
        )
    })?;
    if params.rpi_us < MIN_RPI_US {
        return Err(EnipError::invalid_parameter(
            "rpi_us",
            format!("{}us is below the {MIN_RPI_US}us minimum", params.rpi_us),
        ));
    }

    let enc = generate_encoded_timeout(params.timeout_ms)?;
    let mut out = Vec::with_capacity(35);
    out.put_u8(enc.time_tick);
    out.put_u8(enc.ticks);
    out.put_u32_le(O_T_CONNECTION_ID);
    out.put_u32_le(T_O_CONNECTION_ID);
    out.put_u16_le(CONNECTION_SERIAL);
    out.put_u16_le(params.vendor_id);
    out.put_u32_le(params.originator_serial);
    out.put_u32_le(multiplier);
    out.put_u32_le(params.rpi_us);
    out.put_u16_le(params.o_t_params);
    out.put_u32_le(params.rpi_us);
    out.put_u16_le(params.t_o_params);
    out.put_u8(TRANSPORT_CLASS_TRIGGER);
    Ok(out)
}

/// Parameters of a Forward Close request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCloseParams {
    /// Request timeout in milliseconds (must exceed 900).
    pub timeout_ms: u32,
    /// Originator vendor id.
    pub vendor_id: u16,
    /// Originator serial number.
    pub originator_serial: u32,
}

impl Default for ForwardCloseParams {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            vendor_id: DEFAULT_VENDOR_ID,
            originator_serial: DEFAULT_ORIGINATOR_SERIAL,
        }
    }
}

/// Builds the 10-byte Forward Close parameter block.
pub fn build_forward_close(params: &ForwardCloseParams) -> Result<Vec<u8>> {
    validate_originator(params.timeout_ms, params.vendor_id, params.originator_serial)?;
    let enc = generate_encoded_timeout(params.timeout_ms)?;
    let mut out = Vec::with_capacity(10);
    out.put_u8(enc.time_tick);
    out.put_u8(enc.ticks);
    out.put_u16_le(CONNECTION_SERIAL);
    out.put_u16_le(params.vendor_id);
    out.put_u32_le(params.originator_serial);
    Ok(out)
}

fn connection_manager_path() -> Vec<u8> {
    EPath::new()
        .class(CONNECTION_MANAGER_CLASS)
        .instance(0x01)
        .into_bytes()
}

/// Builds a complete Forward Open request routed along `connection_path`.
pub fn forward_open_request(params: &ForwardOpenParams, connection_path: &[u8]) -> Result<Vec<u8>> {
    let mut data = build_forward_open(params)?;
    data.put_u8(word_len(connection_path.len()) as u8);
    data.extend_from_slice(connection_path);
    data.pad_to_even();
    Ok(message_router::build(
        FORWARD_OPEN,
        &connection_manager_path(),
        &data,
    ))
}

/// Builds a complete Forward Close request routed along `connection_path`.
pub fn forward_close_request(
    params: &ForwardCloseParams,
    connection_path: &[u8],
) -> Result<Vec<u8>> {
    let mut data = build_forward_close(params)?;
    data.put_u8(word_len(connection_path.len()) as u8);
    data.put_u8(0x00);
    data.extend_from_slice(connection_path);
    data.pad_to_even();
    Ok(message_router::build(
        FORWARD_CLOSE,
        &connection_manager_path(),
        &data,
    ))
}

/// Successful Forward Open reply data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOpenReply {
    /// Connection id chosen by the target for O→T traffic.
    pub o_t_connection_id: u32,
    /// Connection id for T→O traffic.
    pub t_o_connection_id: u32,
    /// Connection serial number echoed back.
    pub connection_serial: u16,
    /// Originator vendor id echoed back.
    pub vendor_id: u16,
    /// Originator serial number echoed back.
    pub originator_serial: u32,
    /// Actual O→T packet interval in microseconds.
    pub o_t_api: u32,
    /// Actual T→O packet interval in microseconds.
    pub t_o_api: u32,
}

impl ForwardOpenReply {
    /// Parses the data of a successful Forward Open reply.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            o_t_connection_id: r.u32()?,
            t_o_connection_id: r.u32()?,
            connection_serial: r.u16()?,
            vendor_id: r.u16()?,
            originator_serial: r.u32()?,
            o_t_api: r.u32()?,
            t_o_api: r.u32()?,
        })
    }
}
