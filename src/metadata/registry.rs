//! Per-class property registry. Built once at boot, then shared read-only.

use super::{ClassDef, ClassMappingContext, CompositionAction, CompositionKind, PropertyDescriptor};
use crate::entity::{FieldValue, Instance, TrackedCollection};
use crate::error::MetadataError;
use indexmap::IndexMap;

#[derive(Clone, Debug, Default)]
pub struct MetadataRegistry {
    classes: IndexMap<String, ClassMappingContext>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor to the class context, creating the context on first use.
    /// Re-registering the same (class, name) overwrites the earlier descriptor.
    pub fn register_property(
        &mut self,
        class: &str,
        name: &str,
        declared_type: &str,
        composition: CompositionKind,
        action: CompositionAction,
    ) {
        let ctx = self
            .classes
            .entry(class.to_string())
            .or_insert_with(|| ClassMappingContext::new(class));
        ctx.upsert(PropertyDescriptor {
            owner_class: class.to_string(),
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            composition,
            action,
        });
    }

    pub fn set_identity_field(&mut self, class: &str, field: &str) {
        let ctx = self
            .classes
            .entry(class.to_string())
            .or_insert_with(|| ClassMappingContext::new(class));
        ctx.identity_field = Some(field.to_string());
    }

    /// Register every property of a static class table.
    pub fn register_class(&mut self, def: &ClassDef) {
        self.classes
            .entry(def.name.to_string())
            .or_insert_with(|| ClassMappingContext::new(def.name));
        if let Some(id) = def.identity {
            self.set_identity_field(def.name, id);
        }
        for p in def.properties {
            self.register_property(def.name, p.name, p.declared_type, p.composition, p.action);
        }
    }

    pub fn register_classes(&mut self, defs: &[ClassDef]) {
        for def in defs {
            self.register_class(def);
        }
    }

    pub fn context(&self, class: &str) -> Option<&ClassMappingContext> {
        self.classes.get(class)
    }

    pub fn descriptor(&self, class: &str, name: &str) -> Option<&PropertyDescriptor> {
        self.classes.get(class).and_then(|c| c.property(name))
    }

    /// Recover a class from a declared type name, e.g. the element type of a collection.
    /// Scalar type names resolve to `None`.
    pub fn class_by_type_name(&self, name: &str) -> Option<&ClassMappingContext> {
        self.classes.get(name)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassMappingContext> {
        self.classes.values()
    }

    /// Factory for a bare instance of `class`. Entity classes (those with an identity field)
    /// get every collection-valued property seeded with an empty tracked collection; plain
    /// data shapes hold lists instead.
    pub fn instantiate(&self, class: &str) -> Result<Instance, MetadataError> {
        let ctx = self
            .context(class)
            .ok_or_else(|| MetadataError::UnknownClass(class.to_string()))?;
        let mut instance = Instance::new(class, ctx.identity_field.as_deref());
        for p in ctx.properties() {
            if ctx.identity_field.is_some() && p.composition == CompositionKind::Collection {
                instance.set(p.name.clone(), FieldValue::Collection(TrackedCollection::new()));
            }
        }
        Ok(instance)
    }
}
