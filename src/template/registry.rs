use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{Atomic, Template, TemplateDefinition, TypeRef, STRING_CAPACITY};
use crate::error::{EnipError, Result};

/// Templates known to a controller, keyed by [`TypeRef`].
///
/// A new registry already holds every atomic type and the built-in `STRING`.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<TypeRef, Arc<Template>>,
    handles: HashMap<u16, Arc<Template>>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    /// Creates a registry with the atomic types and `STRING`.
    pub fn new() -> Self {
        let mut registry = Self {
            templates: HashMap::new(),
            handles: HashMap::new(),
        };
        for atomic in Atomic::ALL {
            registry.insert(
                TypeRef::from(atomic.data_type()),
                Arc::new(Template::atomic(atomic)),
            );
        }
        registry.insert(
            TypeRef::from("STRING"),
            Arc::new(Template::string("STRING", STRING_CAPACITY)),
        );
        registry
    }

    fn insert(&mut self, key: TypeRef, template: Arc<Template>) {
        if template.structure_handle() != 0 {
            self.handles
                .insert(template.structure_handle(), template.clone());
        }
        self.templates.insert(key, template);
    }

    /// Lays out `definition` and stores it under its name.
    ///
    /// Registering a name again replaces the earlier template.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::UnresolvedType` if a member type is not registered.
    pub fn register(&mut self, definition: TemplateDefinition) -> Result<Arc<Template>> {
        let template = Arc::new(Template::structure(&definition, |r| self.get(r))?);
        debug!(
            name = %definition.name,
            size_bits = template.size_bits(),
            handle = definition.structure_handle,
            "registered template"
        );
        self.insert(TypeRef::Name(definition.name), template.clone());
        Ok(template)
    }

    /// Registers several definitions whose members may reference each other.
    ///
    /// Definitions are laid out once all their dependencies are available,
    /// regardless of the order they are given in.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::UnresolvedType` naming the first definition left
    /// with a reference nothing provides (including cycles).
    pub fn register_all(
        &mut self,
        definitions: impl IntoIterator<Item = TemplateDefinition>,
    ) -> Result<()> {
        let mut pending: Vec<TemplateDefinition> = definitions.into_iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for definition in pending {
                if definition.dependencies().all(|r| self.contains(r)) {
                    self.register(definition)?;
                } else {
                    waiting.push(definition);
                }
            }
            if waiting.len() == before {
                let stuck = &waiting[0];
                let reference = stuck
                    .dependencies()
                    .find(|r| !self.contains(r))
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Err(EnipError::UnresolvedType {
                    template: stuck.name.clone(),
                    reference,
                });
            }
            pending = waiting;
        }
        Ok(())
    }

    /// Template for a type reference.
    pub fn get(&self, type_ref: &TypeRef) -> Option<Arc<Template>> {
        self.templates.get(type_ref).cloned()
    }

    /// Template registered with a controller structure handle.
    pub fn get_by_handle(&self, structure_handle: u16) -> Option<Arc<Template>> {
        self.handles.get(&structure_handle).cloned()
    }

    /// Returns whether a type reference is known.
    pub fn contains(&self, type_ref: &TypeRef) -> bool {
        self.templates.contains_key(type_ref)
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Always false: atomic types are preloaded.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::DataType;

    #[test]
    fn test_preloaded_types() {
        let reg = TemplateRegistry::new();
        assert_eq!(reg.len(), Atomic::ALL.len() + 1);
        assert!(reg.contains(&TypeRef::from(DataType::LREAL)));
        assert!(reg.get(&TypeRef::from("STRING")).unwrap().is_string());
    }

    #[test]
    fn test_unresolved_reference() {
        let mut reg = TemplateRegistry::new();
        let err = reg
            .register(TemplateDefinition::new("Motor").member("drive", "Drive"))
            .unwrap_err();
        match err {
            EnipError::UnresolvedType {
                template,
                reference,
            } => {
                assert_eq!(template, "Motor");
                assert_eq!(reference, "Drive");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!reg.contains(&TypeRef::from("Motor")));
    }

    #[test]
    fn test_register_all_resolves_dependency_order() {
        let mut reg = TemplateRegistry::new();
        reg.register_all(vec![
            TemplateDefinition::new("Line")
                .member("start", "Point")
                .member("end", "Point")
                .with_handle(0x0F01),
            TemplateDefinition::new("Point")
                .member("x", DataType::REAL)
                .member("y", DataType::REAL),
        ])
        .unwrap();

        let line = reg.get(&TypeRef::from("Line")).unwrap();
        assert_eq!(line.size_bits(), 128);
        assert_eq!(line.members()[1].offset_bits, 64);
        assert_eq!(reg.get_by_handle(0x0F01).unwrap().name(), "Line");
        assert!(reg.get_by_handle(0x0F02).is_none());
    }

    #[test]
    fn test_register_all_reports_cycle() {
        let mut reg = TemplateRegistry::new();
        let err = reg
            .register_all(vec![
                TemplateDefinition::new("A").member("b", "B"),
                TemplateDefinition::new("B").member("a", "A"),
            ])
            .unwrap_err();
        assert!(matches!(err, EnipError::UnresolvedType { .. }));
    }
}
