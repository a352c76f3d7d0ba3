//! Builds a target-class instance from a source instance using the registered pairs and
//! both classes' descriptors.

use super::MappingPairRegistry;
use crate::entity::{FieldValue, Instance, Intent};
use crate::error::{json_kind, MappingError, MetadataError};
use crate::materialize::EntityMaterializer;
use crate::metadata::{CompositionAction, MetadataRegistry, PropertyDescriptor};
use serde_json::Value;

pub struct StructuralMapper<'a> {
    metadata: &'a MetadataRegistry,
    pairs: &'a MappingPairRegistry,
}

impl<'a> StructuralMapper<'a> {
    pub fn new(metadata: &'a MetadataRegistry, pairs: &'a MappingPairRegistry) -> Self {
        StructuralMapper { metadata, pairs }
    }

    /// Map `source` (an instance of `source_class`) into a new `target_class` instance.
    ///
    /// Properties are copied by name; properties the target does not declare are dropped.
    /// Registered overrides run last and see the original source.
    pub fn map(
        &self,
        source: &Instance,
        source_class: &str,
        target_class: &str,
    ) -> Result<Instance, MappingError> {
        let pair = self
            .pairs
            .find(source_class, target_class)
            .ok_or_else(|| MappingError::NotRegistered {
                from: source_class.to_string(),
                to: target_class.to_string(),
            })?;
        let source_ctx = self
            .metadata
            .context(source_class)
            .ok_or_else(|| MetadataError::UnknownClass(source_class.to_string()))?;
        let target_ctx = self
            .metadata
            .context(target_class)
            .ok_or_else(|| MetadataError::UnknownClass(target_class.to_string()))?;

        let mut target = self.metadata.instantiate(target_class)?;
        for sp in source_ctx.properties() {
            let Some(value) = source.get(&sp.name) else { continue };
            let Some(tp) = target_ctx.property(&sp.name) else { continue };
            self.assign(&mut target, value, tp)?;
        }

        for (field, f) in pair.overrides() {
            target.set(field, f(source));
        }
        Ok(target)
    }

    /// `map` with the source class taken from the instance itself.
    pub fn map_to(&self, source: &Instance, target_class: &str) -> Result<Instance, MappingError> {
        self.map(source, source.class(), target_class)
    }

    pub fn map_all<'s>(
        &self,
        sources: impl IntoIterator<Item = &'s Instance>,
        target_class: &str,
    ) -> Result<Vec<Instance>, MappingError> {
        sources
            .into_iter()
            .map(|s| self.map_to(s, target_class))
            .collect()
    }

    fn assign(
        &self,
        target: &mut Instance,
        value: &FieldValue,
        tp: &PropertyDescriptor,
    ) -> Result<(), MappingError> {
        let target_is_collection = target.collection(&tp.name).is_some();
        match value {
            FieldValue::Scalar(v) => {
                target.set(tp.name.as_str(), FieldValue::Scalar(v.clone()));
            }
            FieldValue::Collection(c) if target_is_collection => {
                let items = self.map_elements(c.iter(), tp)?;
                self.fill_collection(target, tp, items);
            }
            FieldValue::Collection(c) => {
                let items = self.map_elements(c.iter(), tp)?;
                target.set(tp.name.as_str(), FieldValue::List(items.into_iter().map(FieldValue::from).collect()));
            }
            FieldValue::List(items) if target_is_collection => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.wrap_element(item, tp)?);
                }
                self.fill_collection(target, tp, elements);
            }
            FieldValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        FieldValue::Entity(e) => FieldValue::from(self.map_element(e, tp)?),
                        other => other.clone(),
                    });
                }
                target.set(tp.name.as_str(), FieldValue::List(out));
            }
            FieldValue::Entity(e) => {
                let nested = match self.metadata.class_by_type_name(&tp.declared_type) {
                    Some(ctx) if ctx.class != e.class() => self.map(e, e.class(), &ctx.class)?,
                    _ => (**e).clone(),
                };
                target.set(tp.name.as_str(), nested);
            }
        }
        Ok(())
    }

    fn map_elements<'s>(
        &self,
        items: impl Iterator<Item = &'s Instance>,
        tp: &PropertyDescriptor,
    ) -> Result<Vec<Instance>, MappingError> {
        items.map(|e| self.map_element(e, tp)).collect()
    }

    /// Elements already of the configured element class are copied as-is.
    fn map_element(&self, element: &Instance, tp: &PropertyDescriptor) -> Result<Instance, MappingError> {
        match self.metadata.class_by_type_name(&tp.declared_type) {
            Some(ctx) if ctx.class != element.class() => self.map(element, element.class(), &ctx.class),
            _ => Ok(element.clone()),
        }
    }

    /// A plain-list element headed for a tracked collection: entities are mapped, JSON objects
    /// are built as the element class, anything else cannot become an element.
    fn wrap_element(&self, item: &FieldValue, tp: &PropertyDescriptor) -> Result<Instance, MappingError> {
        match item {
            FieldValue::Entity(e) => self.map_element(e, tp),
            FieldValue::Scalar(raw @ Value::Object(_)) => {
                let ctx = self
                    .metadata
                    .class_by_type_name(&tp.declared_type)
                    .ok_or_else(|| MetadataError::UnknownClass(tp.declared_type.clone()))?;
                Ok(EntityMaterializer::new(self.metadata).build(&ctx.class, raw, Intent::Create)?)
            }
            other => Err(MappingError::UnexpectedElement {
                field: format!("{}.{}", tp.owner_class, tp.name),
                found: match other {
                    FieldValue::Scalar(v) => json_kind(v),
                    FieldValue::List(_) => "array",
                    FieldValue::Collection(_) => "collection",
                    FieldValue::Entity(_) => "entity",
                },
            }),
        }
    }

    fn fill_collection(&self, target: &mut Instance, tp: &PropertyDescriptor, items: Vec<Instance>) {
        let Some(collection) = target.collection_mut(&tp.name) else { return };
        match tp.action {
            CompositionAction::ReplaceAll => collection.update(items),
            CompositionAction::MergeAdd => items.into_iter().for_each(|i| collection.add(i)),
        }
    }
}
