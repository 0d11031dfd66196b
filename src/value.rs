//! Tag values.
//!
//! [`TagValue`] covers every value a tag can hold: the elementary CIP types,
//! arrays, and structures deserialized through a template.
//!
//! # Example
//!
//! ```
//! use enip_cip::TagValue;
//!
//! let v = TagValue::from(42i32);
//! assert_eq!(v.as_i64(), Some(42));
//! assert!(TagValue::from(true).as_bool().unwrap());
//! ```

use std::fmt;

/// A value read from or written to a controller tag.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagValue {
    /// `BOOL`, or a single bit of an integer tag.
    Bool(bool),
    /// `SINT`.
    Sint(i8),
    /// `INT`.
    Int(i16),
    /// `DINT`.
    Dint(i32),
    /// `LINT`.
    Lint(i64),
    /// `USINT`.
    Usint(u8),
    /// `UINT`.
    Uint(u16),
    /// `UDINT`.
    Udint(u32),
    /// `REAL`.
    Real(f32),
    /// `LREAL`.
    Lreal(f64),
    /// `DWORD` and `BIT_STRING` words.
    Dword(u32),
    /// Array of elements.
    Array(Vec<TagValue>),
    /// Structure instance.
    Struct(StructValue),
}

impl TagValue {
    /// Returns the value as a boolean (integers are true when non-zero).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Returns an integer value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            TagValue::Bool(b) => i64::from(*b),
            TagValue::Sint(v) => i64::from(*v),
            TagValue::Int(v) => i64::from(*v),
            TagValue::Dint(v) => i64::from(*v),
            TagValue::Lint(v) => *v,
            TagValue::Usint(v) => i64::from(*v),
            TagValue::Uint(v) => i64::from(*v),
            TagValue::Udint(v) => i64::from(*v),
            TagValue::Dword(v) => i64::from(*v),
            _ => return None,
        })
    }

    /// Returns a numeric value as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Real(v) => Some(f64::from(*v)),
            TagValue::Lreal(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the elements of an array value.
    pub fn as_array(&self) -> Option<&[TagValue]> {
        match self {
            TagValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the structure of a structure value.
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            TagValue::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable access to a structure value.
    pub fn as_struct_mut(&mut self) -> Option<&mut StructValue> {
        match self {
            TagValue::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Text of a string-shaped structure.
    pub fn as_string(&self) -> Option<String> {
        self.as_struct().and_then(StructValue::get_string)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for TagValue {
                fn from(value: $ty) -> Self {
                    TagValue::$variant(value)
                }
            }
        )+
    };
}

impl_from! {
    bool => Bool,
    i8 => Sint,
    i16 => Int,
    i32 => Dint,
    i64 => Lint,
    u8 => Usint,
    u16 => Uint,
    u32 => Udint,
    f32 => Real,
    f64 => Lreal,
    StructValue => Struct,
}

impl From<Vec<TagValue>> for TagValue {
    fn from(items: Vec<TagValue>) -> Self {
        TagValue::Array(items)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Sint(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::Dint(v) => write!(f, "{v}"),
            TagValue::Lint(v) => write!(f, "{v}"),
            TagValue::Usint(v) => write!(f, "{v}"),
            TagValue::Uint(v) => write!(f, "{v}"),
            TagValue::Udint(v) => write!(f, "{v}"),
            TagValue::Real(v) => write!(f, "{v}"),
            TagValue::Lreal(v) => write!(f, "{v}"),
            TagValue::Dword(v) => write!(f, "0x{v:08X}"),
            TagValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            TagValue::Struct(s) => match s.get_string() {
                Some(text) => write!(f, "{text:?}"),
                None => {
                    f.write_str("{")?;
                    for (i, (name, value)) in s.members.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{name}: {value}")?;
                    }
                    f.write_str("}")
                }
            },
        }
    }
}

/// Ordered member values of a structure.
///
/// Values deserialized from a string-shaped template (`LEN: DINT`,
/// `DATA: SINT[N]`) also expose [`get_string`](Self::get_string) and
/// [`set_string`](Self::set_string).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructValue {
    members: Vec<(String, TagValue)>,
    string_length: usize,
}

impl StructValue {
    /// Creates an empty structure.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_string_length(mut self, string_length: usize) -> Self {
        self.string_length = string_length;
        self
    }

    /// Appends or replaces a member, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Member value by name.
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Mutable member value by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut TagValue> {
        self.members
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Sets a member, appending it if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<TagValue>) {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.members.push((name, value)),
        }
    }

    /// Members in definition order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.members.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Declared capacity when this is a string structure, else 0.
    pub fn string_length(&self) -> usize {
        self.string_length
    }

    /// Reads `LEN` characters out of `DATA`.
    ///
    /// Returns `None` unless this value came from a string-shaped template.
    pub fn get_string(&self) -> Option<String> {
        if self.string_length == 0 {
            return None;
        }
        let len = self.get("LEN")?.as_i64()?.clamp(0, self.string_length as i64) as usize;
        let data = self.get("DATA")?.as_array()?;
        Some(
            data.iter()
                .take(len)
                .filter_map(TagValue::as_i64)
                .map(|c| char::from(c as u8))
                .collect(),
        )
    }

    /// Writes `text` into `DATA` and its length into `LEN`.
    ///
    /// Text beyond the declared length is truncated and unused slots are
    /// zeroed. Returns `false` (and changes nothing) unless this value came
    /// from a string-shaped template.
    pub fn set_string(&mut self, text: &str) -> bool {
        if self.string_length == 0 {
            return false;
        }
        let bytes: Vec<u8> = text.bytes().take(self.string_length).collect();
        let data = (0..self.string_length)
            .map(|i| TagValue::Sint(bytes.get(i).copied().unwrap_or(0) as i8))
            .collect::<Vec<_>>();
        self.set("LEN", TagValue::Dint(bytes.len() as i32));
        self.set("DATA", TagValue::Array(data));
        true
    }
}
