//! Registry of user object and enum classes.
//!
//! Both peers must build identical registries: a class is identified on the
//! wire by its registered id only. User ids are offset past the built-in
//! class ids, so they never collide with them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::class::USER_BASE;
use crate::protocol::error::CodecError;

/// Shape of a registered class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassDescriptor {
    Object {
        name: Arc<str>,
        fields: Vec<String>,
    },
    Enum {
        name: Arc<str>,
        variants: Vec<String>,
    },
}

impl ClassDescriptor {
    pub fn name(&self) -> &Arc<str> {
        match self {
            ClassDescriptor::Object { name, .. } | ClassDescriptor::Enum { name, .. } => name,
        }
    }
}

/// Immutable id <-> class mapping, shared by every codec built from it.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_id: BTreeMap<u32, ClassDescriptor>,
    by_name: HashMap<Arc<str>, u32>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    pub fn descriptor(&self, id: u32) -> Option<&ClassDescriptor> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ClassDescriptor)> {
        self.by_id.iter().map(|(id, descriptor)| (*id, descriptor))
    }

    /// Wire class id of a registered class name.
    pub(crate) fn class_id_of(&self, name: &str) -> Result<u32, CodecError> {
        self.id_of(name)
            .map(|id| id + USER_BASE)
            .ok_or_else(|| CodecError::UnregisteredType(name.to_string()))
    }

    /// Descriptor for a wire class id at or above the user base.
    pub(crate) fn by_class_id(&self, class_id: u32) -> Result<&ClassDescriptor, CodecError> {
        class_id
            .checked_sub(USER_BASE)
            .and_then(|id| self.descriptor(id))
            .ok_or(CodecError::UnregisteredClassId(class_id))
    }
}

/// Builder for [`TypeRegistry`].
///
/// # Example
///
/// ```
/// use tether_common::TypeRegistry;
///
/// let registry = TypeRegistry::builder()
///     .register_object(1, "example.User", &["id", "name"]).unwrap()
///     .register_enum(2, "example.Role", &["ADMIN", "GUEST"]).unwrap()
///     .build();
/// assert_eq!(registry.id_of("example.Role"), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    registry: TypeRegistry,
}

impl TypeRegistryBuilder {
    /// Registers an object class with its field names in declaration order.
    pub fn register_object(
        self,
        id: u32,
        name: impl Into<Arc<str>>,
        fields: &[&str],
    ) -> Result<Self, CodecError> {
        let descriptor = ClassDescriptor::Object {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        self.register(id, descriptor)
    }

    /// Registers an enum class with its variant names in ordinal order.
    pub fn register_enum(
        self,
        id: u32,
        name: impl Into<Arc<str>>,
        variants: &[&str],
    ) -> Result<Self, CodecError> {
        if variants.is_empty() {
            return Err(CodecError::Registry("enum must declare at least one variant".into()));
        }
        let descriptor = ClassDescriptor::Enum {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        };
        self.register(id, descriptor)
    }

    fn register(mut self, id: u32, descriptor: ClassDescriptor) -> Result<Self, CodecError> {
        let name = descriptor.name().clone();
        if name.is_empty() {
            return Err(CodecError::Registry("class name must not be empty".into()));
        }
        if id > u32::MAX - USER_BASE {
            return Err(CodecError::Registry(format!("class id {} out of range", id)));
        }
        if self.registry.by_id.contains_key(&id) {
            return Err(CodecError::Registry(format!("duplicate class id {}", id)));
        }
        if self.registry.by_name.contains_key(&name) {
            return Err(CodecError::Registry(format!("duplicate class name {}", name)));
        }
        self.registry.by_name.insert(name, id);
        self.registry.by_id.insert(id, descriptor);
        Ok(self)
    }

    pub fn build(self) -> TypeRegistry {
        self.registry
    }
}
