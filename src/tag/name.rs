//! Tag name grammar and path compilation.
//!
//! Accepted forms:
//!
//! - `name`, `name.member.member`
//! - `name[i]`, `name[i,j]`, `name[i,j,k]`, with single indices on members
//! - `Program:program.name…`
//! - module tags `module[:slot]:I|O|C[.member[idx]]`
//! - any of the above followed by a bit index `.0`…`.31`
//!
//! Names start with a letter or `_` and never contain `__` or end in `_`.
//! Every segment is limited to 40 characters.

use std::sync::OnceLock;

use regex::Regex;

use crate::cip::epath;
use crate::error::{EnipError, Result};

/// Longest accepted name segment.
pub const MAX_SEGMENT_LEN: usize = 40;

/// Highest bit index accepted in a `.bit` suffix.
pub const MAX_BIT_INDEX: u8 = 31;

const NAME: &str = r"(?:_?[a-zA-Z]|_\d)(?:_?[a-zA-Z0-9])*";

type Pattern = OnceLock<std::result::Result<Regex, regex::Error>>;

fn compiled(cell: &'static Pattern, pattern: impl FnOnce() -> String) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(&pattern()))
        .as_ref()
        .map_err(|e| EnipError::invalid_parameter("tag name pattern", e.to_string()))
}

fn user_tag_regex() -> Result<&'static Regex> {
    static CELL: Pattern = OnceLock::new();
    compiled(&CELL, || {
        format!(
            r"^(?:Program:{NAME}\.)?{NAME}(?:\[\d+(?:,\d+){{0,2}}\])?(?:\.{NAME}(?:\[\d+\])?)*(?:\.\d{{1,2}})?$"
        )
    })
}

fn module_tag_regex() -> Result<&'static Regex> {
    static CELL: Pattern = OnceLock::new();
    compiled(&CELL, || {
        format!(r"^{NAME}(?::\d{{1,2}})?:[IOC](?:\.{NAME}(?:\[\d+\])?)?(?:\.\d{{1,2}})?$")
    })
}

fn bit_suffix_regex() -> Result<&'static Regex> {
    static CELL: Pattern = OnceLock::new();
    compiled(&CELL, || r"\.(\d{1,2})$".to_string())
}

/// Checks `name` against the tag name grammar.
///
/// # Errors
///
/// Returns `EnipError::InvalidTagName` describing the first rule broken.
///
/// # Example
///
/// ```
/// use enip_cip::tag::validate_tag_name;
///
/// assert!(validate_tag_name("Program:MainProgram.counter[2].ACC").is_ok());
/// assert!(validate_tag_name("Local:1:I.Data.3").is_ok());
/// assert!(validate_tag_name("4bad").is_err());
/// ```
pub fn validate_tag_name(name: &str) -> Result<()> {
    let reject = |reason: &str| Err(EnipError::invalid_tag_name(name, reason));

    if name.is_empty() {
        return reject("name is empty");
    }
    if let Some(long) = name
        .split(|c| matches!(c, ':' | '.' | '[' | ']' | ','))
        .find(|segment| segment.len() > MAX_SEGMENT_LEN)
    {
        return Err(EnipError::invalid_tag_name(
            name,
            format!("segment '{long}' exceeds {MAX_SEGMENT_LEN} characters"),
        ));
    }
    if !user_tag_regex()?.is_match(name) && !module_tag_regex()?.is_match(name) {
        return reject("does not match the tag name grammar");
    }
    if let Some(bit) = bit_index(name)? {
        if bit > MAX_BIT_INDEX {
            return Err(EnipError::invalid_tag_name(
                name,
                format!("bit index {bit} exceeds {MAX_BIT_INDEX}"),
            ));
        }
    }
    Ok(())
}

/// Returns whether `name` satisfies the tag name grammar.
pub fn is_valid_tag_name(name: &str) -> bool {
    validate_tag_name(name).is_ok()
}

fn bit_index(name: &str) -> Result<Option<u8>> {
    Ok(bit_suffix_regex()?
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}

/// Result of compiling a tag name into a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompiledPath {
    pub path: Vec<u8>,
    pub bit_index: Option<u8>,
}

/// Compiles a validated tag name into data segments.
///
/// A trailing bit suffix is removed from the path and returned separately.
/// For `BIT_STRING` tags an index `[n]` addresses word `n / 32`, bit `n % 32`.
pub(crate) fn compile_path(
    name: &str,
    program: Option<&str>,
    bit_string: bool,
) -> Result<CompiledPath> {
    let mut pieces: Vec<String> = name
        .split(|c| matches!(c, '.' | '[' | ']' | ','))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    let mut bit_index = bit_index(name)?;
    if bit_index.is_some() {
        pieces.pop();
    }

    if bit_string {
        if bit_index.is_some() {
            return Err(EnipError::invalid_tag_name(
                name,
                "BIT_STRING tags cannot take a bit suffix",
            ));
        }
        if let Some(last) = pieces.last_mut() {
            if let Ok(n) = last.parse::<u32>() {
                *last = (n / 32).to_string();
                bit_index = Some((n % 32) as u8);
            }
        }
    }

    let mut path = Vec::new();
    if let Some(program) = program {
        path.extend(epath::data(&format!("Program:{program}"), true)?);
    }
    for piece in &pieces {
        path.extend(epath::data(piece, true)?);
    }
    Ok(CompiledPath { path, bit_index })
}

/// Identity of a tag: MD5 over its path followed by the bit index (32 if none).
pub(crate) fn instance_id(path: &[u8], bit_index: Option<u8>) -> String {
    let mut input = Vec::with_capacity(path.len() + 1);
    input.extend_from_slice(path);
    input.push(bit_index.unwrap_or(32));
    format!("{:x}", md5::compute(&input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_names() {
        let forty = "a".repeat(40);
        let names = [
            "hello",
            "_sometagname",
            "someTagArray[12]",
            "someTagArray[0,1]",
            "someTagArray[0,1,2]",
            "Program:program.tag",
            "Local:1:I.Data",
            "Local:1:I.Data.3",
            "Local:1:O.Data[1]",
            "Local:I",
            "a.b.c",
            "randomTag.2",
            "tag.31",
            forty.as_str(),
        ];
        for name in names {
            assert!(is_valid_tag_name(name), "{name} should be accepted");
        }
    }

    #[test]
    fn test_rejected_names() {
        let forty_one = "a".repeat(41);
        let names = [
            "",
            "someTagArray[1a]",
            "hello[-1]",
            "someOtherTag[0]a",
            "tag.32",
            "tag._memberLengthTooLongAndShouldFailAt41Char",
            "1.2.3",
            "4hello",
            "someTagArray[0,1,2,3]",
            "Program:noTag",
            "tag__double",
            "tag_",
            "Local:1:X.Data",
            forty_one.as_str(),
        ];
        for name in names {
            assert!(!is_valid_tag_name(name), "{name} should be rejected");
        }
    }

    #[test]
    fn test_rejection_reason() {
        match validate_tag_name("tag.40") {
            Err(EnipError::InvalidTagName { name, reason }) => {
                assert_eq!(name, "tag.40");
                assert!(reason.contains("bit index 40"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compile_simple_path() {
        let compiled = compile_path("tag", None, false).unwrap();
        assert_eq!(compiled.path, vec![0x91, 0x03, b't', b'a', b'g', 0x00]);
        assert_eq!(compiled.bit_index, None);
    }

    #[test]
    fn test_compile_program_member_index_bit() {
        let compiled = compile_path("arr[2].ok.5", Some("Main"), false).unwrap();
        let mut expected = vec![0x91, 12];
        expected.extend_from_slice(b"Program:Main");
        expected.extend_from_slice(&[0x91, 0x03, b'a', b'r', b'r', 0x00]);
        expected.extend_from_slice(&[0x28, 0x02]);
        expected.extend_from_slice(&[0x91, 0x02, b'o', b'k']);
        assert_eq!(compiled.path, expected);
        assert_eq!(compiled.bit_index, Some(5));
    }

    #[test]
    fn test_compile_multi_dimension() {
        let compiled = compile_path("m[1,2,3]", None, false).unwrap();
        assert_eq!(
            compiled.path,
            vec![0x91, 0x01, b'm', 0x00, 0x28, 1, 0x28, 2, 0x28, 3]
        );
    }

    #[test]
    fn test_compile_bit_string() {
        let compiled = compile_path("flags[70]", None, true).unwrap();
        assert_eq!(
            compiled.path,
            vec![0x91, 0x05, b'f', b'l', b'a', b'g', b's', 0x00, 0x28, 0x02]
        );
        assert_eq!(compiled.bit_index, Some(6));

        assert!(compile_path("flags.3", None, true).is_err());
    }

    #[test]
    fn test_instance_id_distinguishes_bits() {
        let path = compile_path("tag", None, false).unwrap().path;
        let whole = instance_id(&path, None);
        assert_eq!(whole.len(), 32);
        assert_ne!(whole, instance_id(&path, Some(0)));
        assert_eq!(whole, instance_id(&path, None));
    }
}
