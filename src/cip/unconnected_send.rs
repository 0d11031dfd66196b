//! Unconnected Send service.
//!
//! Wraps a Message Router request so the Connection Manager forwards it along
//! a route (backplane slot, network hop) without an established connection.

use crate::cip::epath::EPath;
use crate::cip::message_router::{self, services};
use crate::codec::{word_len, WriteExt};
use crate::error::{EnipError, Result};

/// Unconnected Send service code at the Connection Manager.
pub const UNCONNECTED_SEND: u8 = services::READ_TAG_FRAGMENTED;

/// Connection Manager class.
pub const CONNECTION_MANAGER_CLASS: u32 = 0x06;

/// Default Unconnected Send timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 2000;

/// Encoded timeout: `2^time_tick · ticks` milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedTimeout {
    /// Tick size exponent (0..16).
    pub time_tick: u8,
    /// Number of ticks (1..256).
    pub ticks: u8,
}

impl EncodedTimeout {
    /// Timeout in milliseconds represented by this encoding.
    pub fn millis(self) -> u64 {
        (1u64 << self.time_tick) * u64::from(self.ticks)
    }
}

/// Finds the tick pair closest to `timeout_ms`.
///
/// Every `time_tick` in `0..16` and `ticks` in `1..256` is tried. On ties the
/// pair found last wins.
///
/// # Errors
///
/// Returns `EnipError::InvalidParameter` for a zero timeout.
///
/// # Example
///
/// ```
/// use enip_cip::cip::unconnected_send::generate_encoded_timeout;
///
/// let enc = generate_encoded_timeout(2000).unwrap();
/// assert_eq!((enc.time_tick, enc.ticks), (4, 125));
/// ```
pub fn generate_encoded_timeout(timeout_ms: u32) -> Result<EncodedTimeout> {
    if timeout_ms == 0 {
        return Err(EnipError::invalid_parameter(
            "timeout",
            "timeouts must be positive",
        ));
    }

    let target = u64::from(timeout_ms);
    let mut best = EncodedTimeout {
        time_tick: 0,
        ticks: 0,
    };
    let mut best_diff = u64::MAX;

    for time_tick in 0u8..16 {
        for ticks in 1u16..256 {
            let candidate = (1u64 << time_tick) * u64::from(ticks);
            let diff = target.abs_diff(candidate);
            if diff <= best_diff {
                best_diff = diff;
                best = EncodedTimeout {
                    time_tick,
                    ticks: ticks as u8,
                };
            }
        }
    }
    Ok(best)
}

/// Builds the Unconnected Send parameter block.
///
/// `[time_tick][ticks][msg_len u16][message][pad][path_words u8][reserved][path]`
pub fn build_frame(message_request: &[u8], path: &[u8], timeout_ms: u32) -> Result<Vec<u8>> {
    if message_request.len() > u16::MAX as usize {
        return Err(EnipError::invalid_parameter(
            "message_request",
            "embedded request exceeds 65535 bytes",
        ));
    }
    let timeout_ms = if timeout_ms < 100 { 1000 } else { timeout_ms };
    let enc = generate_encoded_timeout(timeout_ms)?;

    let mut out = Vec::with_capacity(8 + message_request.len() + path.len());
    out.put_u8(enc.time_tick);
    out.put_u8(enc.ticks);
    out.put_u16_le(message_request.len() as u16);
    out.extend_from_slice(message_request);
    out.pad_to_even();
    out.put_u8(word_len(path.len()) as u8);
    out.put_u8(0x00);
    out.extend_from_slice(path);
    out.pad_to_even();
    Ok(out)
}

/// Wraps `message_request` in an Unconnected Send to the Connection Manager.
///
/// # Example
///
/// ```
/// use enip_cip::cip::epath::port;
/// use enip_cip::cip::unconnected_send;
///
/// let route = port(1, &0u8.into()).unwrap();
/// let frame = unconnected_send::build(&[0x4C, 0x00, 0x01, 0x00], &route, 2000).unwrap();
/// assert_eq!(&frame[..6], &[0x52, 0x02, 0x20, 0x06, 0x24, 0x01]);
/// ```
pub fn build(message_request: &[u8], path: &[u8], timeout_ms: u32) -> Result<Vec<u8>> {
    let frame = build_frame(message_request, path, timeout_ms)?;
    let cm_path = EPath::new()
        .class(CONNECTION_MANAGER_CLASS)
        .instance(0x01)
        .into_bytes();
    Ok(message_router::build(UNCONNECTED_SEND, &cm_path, &frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::epath;

    #[test]
    fn test_encoded_timeout_vectors() {
        let enc = generate_encoded_timeout(2304).unwrap();
        assert_eq!((enc.time_tick, enc.ticks), (8, 9));

        let enc = generate_encoded_timeout(2400).unwrap();
        assert_eq!((enc.time_tick, enc.ticks), (5, 75));

        let enc = generate_encoded_timeout(2000).unwrap();
        assert_eq!((enc.time_tick, enc.ticks), (4, 125));
        assert_eq!(enc.millis(), 2000);
    }

    #[test]
    fn test_encoded_timeout_rejects_zero() {
        assert!(generate_encoded_timeout(0).is_err());
    }

    #[test]
    fn test_frame_layout_odd_message() {
        let path = b"sometag";
        let mr = message_router::build(services::READ_TAG, path, &[0x01, 0x00]);
        assert_eq!(mr.len(), 12);

        let mut odd = mr.clone();
        odd.push(0xEE);
        let route = epath::port(1, &5u8.into()).unwrap();
        let frame = build_frame(&odd, &route, 2000).unwrap();

        assert_eq!(frame[0], 4);
        assert_eq!(frame[1], 125);
        assert_eq!(&frame[2..4], &[13, 0]);
        assert_eq!(&frame[4..17], &odd[..]);
        assert_eq!(frame[17], 0x00); // pad
        assert_eq!(frame[18], 1); // path words
        assert_eq!(frame[19], 0x00);
        assert_eq!(&frame[20..], &[0x01, 0x05]);
    }

    #[test]
    fn test_short_timeout_is_replaced() {
        let frame = build_frame(&[0x4C, 0x00], &[0x01, 0x00], 50).unwrap();
        let enc = generate_encoded_timeout(1000).unwrap();
        assert_eq!((frame[0], frame[1]), (enc.time_tick, enc.ticks));
    }

    #[test]
    fn test_wrapped_to_connection_manager() {
        let frame = build(&[0x4C, 0x00], &[0x01, 0x00], 2000).unwrap();
        assert_eq!(frame[0], UNCONNECTED_SEND);
        assert_eq!(frame[1], 2);
        assert_eq!(&frame[2..6], &[0x20, 0x06, 0x24, 0x01]);
        assert_eq!(&frame[6..8], &[4, 125]);
    }
}
