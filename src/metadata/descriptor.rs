//! Property descriptors and the per-class context that orders them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a property composes other mapped classes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionKind {
    #[default]
    None,
    NestedEntity,
    Collection,
}

/// How an incoming plain list is folded into a tracked collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionAction {
    /// Converge the collection to exactly the incoming items.
    #[default]
    ReplaceAll,
    /// Add the incoming items, keeping whatever is already there.
    MergeAdd,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub owner_class: String,
    pub name: String,
    /// Scalar type name ("string", "number", ...) or, for composite properties, the
    /// class name of the nested entity or collection element.
    pub declared_type: String,
    pub composition: CompositionKind,
    pub action: CompositionAction,
}

impl PropertyDescriptor {
    pub fn is_relation(&self) -> bool {
        self.composition != CompositionKind::None
    }
}

/// Ordered property descriptors for one class.
#[derive(Clone, Debug)]
pub struct ClassMappingContext {
    pub class: String,
    /// Name of the public identity property; `None` for plain data shapes.
    pub identity_field: Option<String>,
    properties: IndexMap<String, PropertyDescriptor>,
}

impl ClassMappingContext {
    pub(crate) fn new(class: &str) -> Self {
        ClassMappingContext {
            class: class.to_string(),
            identity_field: None,
            properties: IndexMap::new(),
        }
    }

    /// Insert or overwrite by name. Overwriting keeps the original position.
    pub(crate) fn upsert(&mut self, descriptor: PropertyDescriptor) {
        self.properties.insert(descriptor.name.clone(), descriptor);
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Collection and nested-entity properties, in registration order.
    pub fn relations(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values().filter(|p| p.is_relation())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
