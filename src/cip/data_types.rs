//! CIP elementary data type codes (CIP Vol 1, Appendix C).

use std::fmt;

macro_rules! data_types {
    ($($variant:ident = $code:literal),+ $(,)?) => {
        /// CIP data type code as carried in Read/Write Tag services.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        pub enum DataType {
            $(
                #[doc = concat!("`", stringify!($variant), "` (", stringify!($code), ")")]
                $variant,
            )+
        }

        impl DataType {
            /// Every known type, in code order.
            pub const ALL: &'static [DataType] = &[$(DataType::$variant),+];

            /// Wire code of this type.
            pub const fn code(self) -> u16 {
                match self {
                    $(DataType::$variant => $code,)+
                }
            }

            /// Looks up a type by its wire code.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(DataType::$variant),)+
                    _ => None,
                }
            }

            /// Type name as used in controller tooling.
            pub const fn name(self) -> &'static str {
                match self {
                    $(DataType::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

data_types! {
    BOOL = 0x00C1,
    SINT = 0x00C2,
    INT = 0x00C3,
    DINT = 0x00C4,
    LINT = 0x00C5,
    USINT = 0x00C6,
    UINT = 0x00C7,
    UDINT = 0x00C8,
    REAL = 0x00CA,
    LREAL = 0x00CB,
    STIME = 0x00CC,
    DATE = 0x00CD,
    TIME_AND_DAY = 0x00CE,
    DATE_AND_STRING = 0x00CF,
    STRING = 0x00D0,
    WORD = 0x00D1,
    DWORD = 0x00D2,
    BIT_STRING = 0x00D3,
    LWORD = 0x00D4,
    STRING2 = 0x00D5,
    FTIME = 0x00D6,
    LTIME = 0x00D7,
    ITIME = 0x00D8,
    STRINGN = 0x00D9,
    SHORT_STRING = 0x00DA,
    TIME = 0x00DB,
    EPATH = 0x00DC,
    ENGUNIT = 0x00DD,
    STRINGI = 0x00DE,
    STRUCT = 0x02A0,
}

impl DataType {
    /// Byte width of the integer types that accept a bit index.
    pub fn bit_host_width(self) -> Option<usize> {
        match self {
            DataType::SINT | DataType::USINT => Some(1),
            DataType::INT | DataType::UINT | DataType::WORD => Some(2),
            DataType::DINT | DataType::UDINT | DataType::DWORD | DataType::BIT_STRING => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns whether `code` is a known CIP type code.
pub fn is_valid_type_code(code: u16) -> bool {
    DataType::from_code(code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_code_validator() {
        assert!(is_valid_type_code(0xC1));
        assert!(is_valid_type_code(0xCB));
        assert!(is_valid_type_code(0xD1));
        assert!(is_valid_type_code(213));

        assert!(!is_valid_type_code(0xA1));
        assert!(!is_valid_type_code(0x01));
        assert!(!is_valid_type_code(0xE1));
        assert!(!is_valid_type_code(100));
    }

    #[test]
    fn test_code_name_lookup() {
        for ty in DataType::ALL {
            assert_eq!(DataType::from_code(ty.code()), Some(*ty));
        }
        assert_eq!(DataType::STRUCT.code(), 0x02A0);
        assert_eq!(DataType::DINT.to_string(), "DINT");
        assert_eq!(DataType::from_code(0), None);
    }

    #[test]
    fn test_bit_host_width() {
        assert_eq!(DataType::SINT.bit_host_width(), Some(1));
        assert_eq!(DataType::INT.bit_host_width(), Some(2));
        assert_eq!(DataType::BIT_STRING.bit_host_width(), Some(4));
        assert_eq!(DataType::REAL.bit_host_width(), None);
    }
}
