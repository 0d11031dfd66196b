//! Type templates.
//!
//! A [`Template`] knows the bit layout of a type and how to move a
//! [`TagValue`] in and out of a buffer. Atomic templates wrap one of the
//! elementary CIP types; structural templates are built from an ordered list
//! of members and laid out with the controller's alignment rules.
//!
//! Structural templates are resolved against a [`TemplateRegistry`]:
//!
//! ```
//! use enip_cip::cip::DataType;
//! use enip_cip::template::{TemplateDefinition, TemplateRegistry};
//!
//! let mut registry = TemplateRegistry::new();
//! let point = registry
//!     .register(
//!         TemplateDefinition::new("Point")
//!             .member("x", DataType::DINT)
//!             .member("y", DataType::DINT)
//!             .member("valid", DataType::BOOL),
//!     )
//!     .unwrap();
//! assert_eq!(point.size_bits(), 96);
//! ```

mod atomics;
mod registry;

pub use atomics::{Atomic, AtomicLayout};
pub use registry::TemplateRegistry;

use std::fmt;
use std::sync::Arc;

use crate::cip::DataType;
use crate::error::{EnipError, Result};
use crate::value::{StructValue, TagValue};

/// Default capacity of the built-in `STRING` type.
pub const STRING_CAPACITY: usize = 82;

/// Reference to a type, by CIP code or by template name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// Elementary type code.
    Code(u16),
    /// Named structural type.
    Name(String),
}

impl From<DataType> for TypeRef {
    fn from(ty: DataType) -> Self {
        TypeRef::Code(ty.code())
    }
}

impl From<&str> for TypeRef {
    /// Elementary type names map to their code.
    fn from(name: &str) -> Self {
        DataType::ALL
            .iter()
            .filter(|ty| Atomic::from_data_type(**ty).is_some())
            .find(|ty| ty.name() == name)
            .map(|ty| TypeRef::Code(ty.code()))
            .unwrap_or_else(|| TypeRef::Name(name.to_string()))
    }
}

impl From<String> for TypeRef {
    fn from(name: String) -> Self {
        TypeRef::from(name.as_str())
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Code(code) => match DataType::from_code(*code) {
                Some(ty) => write!(f, "{ty}"),
                None => write!(f, "0x{code:04X}"),
            },
            TypeRef::Name(name) => f.write_str(name),
        }
    }
}

/// Unresolved member definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDefinition {
    /// Member name.
    pub name: String,
    /// Member type.
    pub type_ref: TypeRef,
    /// Element count; 0 for a scalar.
    pub array_length: usize,
}

/// Definition of a structural template, before layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefinition {
    /// Template name.
    pub name: String,
    /// Members in declaration order.
    pub members: Vec<MemberDefinition>,
    /// Structure handle reported by the controller, 0 if unknown.
    pub structure_handle: u16,
}

impl TemplateDefinition {
    /// Starts an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            structure_handle: 0,
        }
    }

    /// Appends a scalar member.
    pub fn member(self, name: impl Into<String>, type_ref: impl Into<TypeRef>) -> Self {
        self.array(name, type_ref, 0)
    }

    /// Appends an array member of `length` elements.
    pub fn array(
        mut self,
        name: impl Into<String>,
        type_ref: impl Into<TypeRef>,
        length: usize,
    ) -> Self {
        self.members.push(MemberDefinition {
            name: name.into(),
            type_ref: type_ref.into(),
            array_length: length,
        });
        self
    }

    /// Sets the controller structure handle.
    pub fn with_handle(mut self, structure_handle: u16) -> Self {
        self.structure_handle = structure_handle;
        self
    }

    /// String-shaped definition: `LEN: DINT`, `DATA: SINT[length]`.
    pub fn string(name: impl Into<String>, length: usize) -> Self {
        Self::new(name)
            .member("LEN", DataType::DINT)
            .array("DATA", DataType::SINT, length)
    }

    /// References this definition needs resolved before layout.
    pub fn dependencies(&self) -> impl Iterator<Item = &TypeRef> {
        self.members.iter().map(|m| &m.type_ref)
    }
}

/// Laid-out structure member.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member name.
    pub name: String,
    /// Member type as declared.
    pub type_ref: TypeRef,
    /// Bit offset from the start of the structure.
    pub offset_bits: usize,
    /// Element count; 0 for a scalar.
    pub array_length: usize,
    /// Resolved member template.
    pub template: Arc<Template>,
}

/// What a template is made of.
#[derive(Debug, Clone)]
pub enum TemplateKind {
    /// Elementary type.
    Atomic(Atomic),
    /// Ordered members.
    Structure(Vec<Member>),
}

/// Bit layout and codec of a type.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    size_bits: usize,
    alignment_bits: usize,
    consecutive_alignment_bits: usize,
    size_multiple_bits: usize,
    string_length: usize,
    structure_handle: u16,
    kind: TemplateKind,
}

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

impl Template {
    /// Template of an elementary type.
    pub fn atomic(atomic: Atomic) -> Self {
        let layout = atomic.layout();
        Self {
            name: atomic.data_type().name().to_string(),
            size_bits: layout.size,
            alignment_bits: layout.alignment,
            consecutive_alignment_bits: layout.consecutive_alignment,
            size_multiple_bits: layout.size_multiple,
            string_length: 0,
            structure_handle: 0,
            kind: TemplateKind::Atomic(atomic),
        }
    }

    /// Lays out a structural template, resolving member types with `resolve`.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::UnresolvedType` for the first member whose type
    /// `resolve` does not know.
    pub fn structure<F>(definition: &TemplateDefinition, resolve: F) -> Result<Self>
    where
        F: Fn(&TypeRef) -> Option<Arc<Template>>,
    {
        let resolved = definition
            .members
            .iter()
            .map(|def| {
                resolve(&def.type_ref)
                    .map(|template| (def, template))
                    .ok_or_else(|| EnipError::UnresolvedType {
                        template: definition.name.clone(),
                        reference: def.type_ref.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::layout(
            &definition.name,
            definition.structure_handle,
            resolved,
        ))
    }

    fn layout(
        name: &str,
        structure_handle: u16,
        resolved: Vec<(&MemberDefinition, Arc<Template>)>,
    ) -> Self {
        let mut members = Vec::with_capacity(resolved.len());
        let mut cursor = 0usize;
        let mut size_multiple = 0usize;
        let mut previous: Option<&TypeRef> = None;

        for (def, template) in resolved {
            let alignment = if previous == Some(&def.type_ref) {
                template.consecutive_alignment_bits
            } else {
                template.alignment_bits
            };
            let offset_bits = align_up(cursor, alignment);
            cursor = offset_bits + template.size_bits * def.array_length.max(1);
            size_multiple = size_multiple.max(template.size_multiple_bits);
            previous = Some(&def.type_ref);

            members.push(Member {
                name: def.name.clone(),
                type_ref: def.type_ref.clone(),
                offset_bits,
                array_length: def.array_length,
                template,
            });
        }

        if size_multiple == 0 {
            size_multiple = 32;
        }
        let string_length = string_signature(&members);

        Self {
            name: name.to_string(),
            size_bits: align_up(cursor, size_multiple),
            alignment_bits: size_multiple,
            consecutive_alignment_bits: size_multiple,
            size_multiple_bits: size_multiple,
            string_length,
            structure_handle,
            kind: TemplateKind::Structure(members),
        }
    }

    /// String-shaped template of `length` characters (e.g. `STRING`, `string10`).
    pub fn string(name: impl Into<String>, length: usize) -> Self {
        let definition = TemplateDefinition::string(name, length);
        let types = [Atomic::Dint, Atomic::Sint].map(|a| Arc::new(Template::atomic(a)));
        let resolved = definition.members.iter().zip(types).collect();
        Self::layout(&definition.name, 0, resolved)
    }

    /// Template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bits.
    pub fn size_bits(&self) -> usize {
        self.size_bits
    }

    /// Size in bytes on the wire.
    pub fn size_bytes(&self) -> usize {
        match self.kind {
            TemplateKind::Atomic(atomic) => atomic.wire_size(),
            TemplateKind::Structure(_) => self.size_bits.div_ceil(8),
        }
    }

    /// Alignment in bits.
    pub fn alignment_bits(&self) -> usize {
        self.alignment_bits
    }

    /// Alignment in bits after a member of the same type.
    pub fn consecutive_alignment_bits(&self) -> usize {
        self.consecutive_alignment_bits
    }

    /// Multiple an enclosing structure's size is rounded to.
    pub fn size_multiple_bits(&self) -> usize {
        self.size_multiple_bits
    }

    /// Character capacity when the template is string-shaped, else 0.
    pub fn string_length(&self) -> usize {
        self.string_length
    }

    /// Returns whether this template has the string signature.
    pub fn is_string(&self) -> bool {
        self.string_length > 0
    }

    /// Controller structure handle, 0 if unknown.
    pub fn structure_handle(&self) -> u16 {
        self.structure_handle
    }

    /// Template contents.
    pub fn kind(&self) -> &TemplateKind {
        &self.kind
    }

    /// Elementary type, for atomic templates.
    pub fn atomic_kind(&self) -> Option<Atomic> {
        match self.kind {
            TemplateKind::Atomic(atomic) => Some(atomic),
            TemplateKind::Structure(_) => None,
        }
    }

    /// Members, empty for atomic templates.
    pub fn members(&self) -> &[Member] {
        match &self.kind {
            TemplateKind::Atomic(_) => &[],
            TemplateKind::Structure(members) => members,
        }
    }

    /// Writes `value` into `buf` starting at `offset_bits`.
    ///
    /// Structure members absent from the value keep the buffer's contents.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::InvalidParameter` when the value's shape does not
    /// match the template.
    pub fn serialize(&self, value: &TagValue, buf: &mut [u8], offset_bits: usize) -> Result<()> {
        match &self.kind {
            TemplateKind::Atomic(atomic) => atomic.serialize(value, buf, offset_bits),
            TemplateKind::Structure(members) => {
                let fields = value.as_struct().ok_or_else(|| {
                    EnipError::invalid_parameter(
                        "value",
                        format!("template '{}' expects a structure, got {value}", self.name),
                    )
                })?;
                for member in members {
                    let Some(field) = fields.get(&member.name) else {
                        continue;
                    };
                    member.serialize(field, buf, offset_bits + member.offset_bits)?;
                }
                Ok(())
            }
        }
    }

    /// Serializes `value` into a fresh buffer of [`size_bytes`](Self::size_bytes).
    pub fn serialize_to_vec(&self, value: &TagValue) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size_bytes()];
        self.serialize(value, &mut buf, 0)?;
        Ok(buf)
    }

    /// Reads a value from `buf` starting at `offset_bits`.
    pub fn deserialize(&self, buf: &[u8], offset_bits: usize) -> Result<TagValue> {
        match &self.kind {
            TemplateKind::Atomic(atomic) => atomic.deserialize(buf, offset_bits),
            TemplateKind::Structure(members) => {
                let mut value = StructValue::new().with_string_length(self.string_length);
                for member in members {
                    let field = member.deserialize(buf, offset_bits + member.offset_bits)?;
                    value.set(member.name.clone(), field);
                }
                Ok(TagValue::Struct(value))
            }
        }
    }
}

impl Member {
    fn element_offsets(&self, base: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.array_length).map(move |i| base + i * self.template.size_bits)
    }

    fn serialize(&self, value: &TagValue, buf: &mut [u8], offset_bits: usize) -> Result<()> {
        if self.array_length == 0 {
            return self.template.serialize(value, buf, offset_bits);
        }
        let items = value.as_array().ok_or_else(|| {
            EnipError::invalid_parameter(
                self.name.clone(),
                format!("expected an array of {}", self.array_length),
            )
        })?;
        if items.len() > self.array_length {
            return Err(EnipError::invalid_parameter(
                self.name.clone(),
                format!(
                    "{} elements exceed the declared length {}",
                    items.len(),
                    self.array_length
                ),
            ));
        }
        for (item, offset) in items.iter().zip(self.element_offsets(offset_bits)) {
            self.template.serialize(item, buf, offset)?;
        }
        Ok(())
    }

    fn deserialize(&self, buf: &[u8], offset_bits: usize) -> Result<TagValue> {
        if self.array_length == 0 {
            return self.template.deserialize(buf, offset_bits);
        }
        self.element_offsets(offset_bits)
            .map(|offset| self.template.deserialize(buf, offset))
            .collect::<Result<Vec<_>>>()
            .map(TagValue::Array)
    }
}

fn string_signature(members: &[Member]) -> usize {
    match members {
        [len, data]
            if len.name == "LEN"
                && len.type_ref == TypeRef::from(DataType::DINT)
                && len.array_length == 0
                && data.name == "DATA"
                && data.type_ref == TypeRef::from(DataType::SINT)
                && data.array_length > 0 =>
        {
            data.array_length
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::new()
    }

    #[test]
    fn test_type_ref_from_name() {
        assert_eq!(TypeRef::from("DINT"), TypeRef::Code(0xC4));
        assert_eq!(TypeRef::from("STRING"), TypeRef::Name("STRING".into()));
        assert_eq!(TypeRef::from("MyUdt"), TypeRef::Name("MyUdt".into()));
        assert_eq!(TypeRef::from(DataType::REAL).to_string(), "REAL");
    }

    #[test]
    fn test_member_offsets_and_size() {
        let mut reg = registry();
        let t = reg
            .register(
                TemplateDefinition::new("Mixed")
                    .member("a", DataType::BOOL)
                    .member("b", DataType::BOOL)
                    .member("c", DataType::DINT)
                    .member("d", DataType::SINT)
                    .member("e", DataType::INT),
            )
            .unwrap();
        let offsets: Vec<_> = t.members().iter().map(|m| m.offset_bits).collect();
        assert_eq!(offsets, vec![0, 1, 32, 64, 80]);
        assert_eq!(t.size_bits(), 96);
        assert_eq!(t.size_bytes(), 12);
    }

    #[test]
    fn test_lint_member_rounds_to_64() {
        let mut reg = registry();
        let t = reg
            .register(
                TemplateDefinition::new("Wide")
                    .member("flag", DataType::BOOL)
                    .member("big", DataType::LINT),
            )
            .unwrap();
        assert_eq!(t.members()[1].offset_bits, 64);
        assert_eq!(t.size_bits(), 128);
        assert_eq!(t.size_multiple_bits(), 64);
    }

    #[test]
    fn test_builtin_string_layout() {
        let reg = registry();
        let string = reg.get(&TypeRef::from("STRING")).unwrap();
        assert_eq!(string.string_length(), STRING_CAPACITY);
        assert_eq!(string.size_bits(), 704);
    }

    #[test]
    fn test_string_signature_detection() {
        let mut reg = registry();
        let short = reg.register(TemplateDefinition::string("string10", 10)).unwrap();
        assert_eq!(short.string_length(), 10);

        let wrong_order = reg
            .register(
                TemplateDefinition::new("NotString")
                    .array("DATA", DataType::SINT, 10)
                    .member("LEN", DataType::DINT),
            )
            .unwrap();
        assert!(!wrong_order.is_string());

        let extra = reg
            .register(TemplateDefinition::string("Extra", 4).member("x", DataType::BOOL))
            .unwrap();
        assert!(!extra.is_string());

        let scalar_data = reg
            .register(
                TemplateDefinition::new("ScalarData")
                    .member("LEN", DataType::DINT)
                    .member("DATA", DataType::SINT),
            )
            .unwrap();
        assert!(!scalar_data.is_string());
    }

    #[test]
    fn test_string_value_roundtrip() {
        let t = Template::string("string10", 10);
        let mut value = t.deserialize(&vec![0u8; t.size_bytes()], 0).unwrap();
        assert!(value.as_struct_mut().unwrap().set_string("abc"));

        let bytes = t.serialize_to_vec(&value).unwrap();
        assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
        assert_eq!(&bytes[4..7], b"abc");

        let back = t.deserialize(&bytes, 0).unwrap();
        assert_eq!(back.as_string().as_deref(), Some("abc"));
    }

    #[test]
    fn test_nested_structure_roundtrip_at_offset() {
        let mut reg = registry();
        reg.register(
            TemplateDefinition::new("Inner")
                .member("on", DataType::BOOL)
                .member("count", DataType::INT),
        )
        .unwrap();
        let outer = reg
            .register(
                TemplateDefinition::new("Outer")
                    .member("inner", "Inner")
                    .array("values", DataType::REAL, 2),
            )
            .unwrap();
        let value = TagValue::Struct(
            StructValue::new()
                .with(
                    "inner",
                    StructValue::new().with("on", true).with("count", 7i16),
                )
                .with(
                    "values",
                    TagValue::Array(vec![TagValue::Real(1.5), TagValue::Real(-2.0)]),
                ),
        );

        let mut buf = vec![0u8; 4 + outer.size_bytes()];
        outer.serialize(&value, &mut buf, 32).unwrap();
        assert_eq!(outer.deserialize(&buf, 32).unwrap(), value);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let t = Template::string("s", 2);
        assert!(t.serialize_to_vec(&TagValue::Dint(1)).is_err());
        let too_long = TagValue::Struct(StructValue::new().with(
            "DATA",
            TagValue::Array(vec![TagValue::Sint(1); 3]),
        ));
        assert!(t.serialize_to_vec(&too_long).is_err());
    }
}
