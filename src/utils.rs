//! Utility functions for bit manipulation.
//!
//! Bit-indexed tags (`MyDint.3`), BOOL members packed inside structures and
//! the identity status word all need the same few helpers, collected here.
//!
//! # Example
//!
//! ```
//! use enip_cip::utils::{get_bit, set_bit, extract_bits};
//!
//! let value: u32 = 0b1010;
//! assert!(get_bit(value, 1));
//! assert!(!get_bit(value, 2));
//! assert_eq!(set_bit(value, 2, true), 0b1110);
//!
//! // 4-bit field at bits 8..=11
//! assert_eq!(extract_bits(0x0234, 8, 11), 2);
//! ```

/// Gets a single bit from a 32-bit word.
///
/// Bit positions of 32 and above always read as `false`.
#[inline]
pub fn get_bit(value: u32, bit: u8) -> bool {
    bit < 32 && (value >> bit) & 1 != 0
}

/// Sets or clears a single bit in a 32-bit word.
///
/// # Example
///
/// ```
/// use enip_cip::utils::set_bit;
///
/// assert_eq!(set_bit(0, 5, true), 0b10_0000);
/// assert_eq!(set_bit(0xFF, 0, false), 0xFE);
/// ```
#[inline]
pub fn set_bit(value: u32, bit: u8, state: bool) -> u32 {
    if bit >= 32 {
        return value;
    }
    if state {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

/// Extracts the inclusive bit range `start_bit..=end_bit`, shifted down to bit 0.
#[inline]
pub fn extract_bits(value: u32, start_bit: u8, end_bit: u8) -> u32 {
    if start_bit > end_bit || end_bit >= 32 {
        return 0;
    }
    let width = u32::from(end_bit - start_bit + 1);
    let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
    (value >> start_bit) & mask
}

/// Builds the OR/AND mask pair used by a Read-Modify-Write request.
///
/// `width` is the size of the target integer in bytes (1, 2 or 4). Writing
/// `true` sets `bit` in the OR mask and leaves the AND mask all ones. Writing
/// `false` leaves the OR mask zero and clears `bit` in the AND mask.
///
/// Returns `None` for any other width or a bit outside the integer.
///
/// # Example
///
/// ```
/// use enip_cip::utils::modify_masks;
///
/// assert_eq!(modify_masks(3, 4, true), Some((0x0000_0008, 0xFFFF_FFFF)));
/// assert_eq!(modify_masks(3, 1, false), Some((0x00, 0xF7)));
/// assert_eq!(modify_masks(8, 1, true), None);
/// ```
pub fn modify_masks(bit: u8, width: usize, state: bool) -> Option<(u32, u32)> {
    let full = match width {
        1 => 0xFF,
        2 => 0xFFFF,
        4 => u32::MAX,
        _ => return None,
    };
    if usize::from(bit) >= width * 8 {
        return None;
    }
    Some(if state {
        (set_bit(0, bit, true), full)
    } else {
        (0, set_bit(full, bit, false))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_bit() {
        assert!(get_bit(0x8000_0000, 31));
        assert!(!get_bit(0x8000_0000, 30));
        assert!(!get_bit(u32::MAX, 32));
    }

    #[test]
    fn test_set_bit_out_of_range_is_noop() {
        assert_eq!(set_bit(0x10, 40, true), 0x10);
    }

    #[test]
    fn test_extract_bits() {
        assert_eq!(extract_bits(0x0F00, 8, 11), 0x0F);
        assert_eq!(extract_bits(0x0200, 8, 11), 2);
        assert_eq!(extract_bits(u32::MAX, 0, 31), u32::MAX);
        assert_eq!(extract_bits(0xFF, 4, 2), 0);
    }

    #[test]
    fn test_modify_masks_by_width() {
        assert_eq!(modify_masks(0, 1, true), Some((0x01, 0xFF)));
        assert_eq!(modify_masks(15, 2, false), Some((0x0000, 0x7FFF)));
        assert_eq!(modify_masks(31, 4, false), Some((0, 0x7FFF_FFFF)));
    }

    #[test]
    fn test_modify_masks_rejects_bits_outside_the_host() {
        assert_eq!(modify_masks(20, 1, true), None);
        assert_eq!(modify_masks(16, 2, false), None);
        assert_eq!(modify_masks(32, 4, true), None);
        assert_eq!(modify_masks(0, 3, true), None);
    }
}
