//! Rebuilds entity graphs from raw JSON property bags (storage rows or request payloads).

use crate::entity::{EntityKey, FieldValue, Instance, Intent};
use crate::error::{json_kind, MaterializeError, MetadataError};
use crate::metadata::MetadataRegistry;
use serde_json::{Map, Value};

pub struct EntityMaterializer<'a> {
    metadata: &'a MetadataRegistry,
}

impl<'a> EntityMaterializer<'a> {
    pub fn new(metadata: &'a MetadataRegistry) -> Self {
        EntityMaterializer { metadata }
    }

    /// Construct a `class` instance and hydrate it from `raw` in one step.
    pub fn build(&self, class: &str, raw: &Value, intent: Intent) -> Result<Instance, MaterializeError> {
        let Value::Object(map) = raw else {
            return Err(MaterializeError::UnexpectedShape {
                class: class.to_string(),
                field: String::new(),
                found: json_kind(raw),
            });
        };
        let mut instance = self.metadata.instantiate(class)?;
        self.materialize(map, &mut instance, intent)?;
        Ok(instance)
    }

    /// Hydrate `target` from `raw`. Keys the target's class does not declare are ignored.
    /// `target` and every entity built beneath it are tagged with `intent`.
    ///
    /// Tracked collections are replaced wholesale (`TrackedCollection::set`), so their delta
    /// logs start empty. Rehydrating an instance that already carries a different public
    /// identity fails rather than silently forking its identity.
    pub fn materialize(
        &self,
        raw: &Map<String, Value>,
        target: &mut Instance,
        intent: Intent,
    ) -> Result<(), MaterializeError> {
        let class = target.class().to_string();
        let ctx = self
            .metadata
            .context(&class)
            .ok_or_else(|| MetadataError::UnknownClass(class.clone()))?;

        if let Some(id_field) = ctx.identity_field.as_deref() {
            check_identity(&class, target, raw.get(id_field))?;
        }
        target.set_intent(intent);

        for (key, value) in raw {
            let Some(desc) = ctx.property(key) else { continue };

            // The entity owns its collections: only their contents are replaced. `null` empties
            // one; any other non-array value is a shape error.
            if target.collection(key).is_some() {
                let items = match value {
                    Value::Array(items) => items.as_slice(),
                    Value::Null => &[],
                    other => {
                        return Err(MaterializeError::UnexpectedShape {
                            class: class.clone(),
                            field: key.clone(),
                            found: json_kind(other),
                        })
                    }
                };
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    elements.push(self.build_nested(&class, key, &desc.declared_type, item, intent)?);
                }
                if let Some(collection) = target.collection_mut(key) {
                    collection.set(elements);
                }
                continue;
            }

            if self.metadata.class_by_type_name(&desc.declared_type).is_some() {
                let nested = match value {
                    Value::Null => FieldValue::Scalar(Value::Null),
                    Value::Array(items) => {
                        let mut list = Vec::with_capacity(items.len());
                        for item in items {
                            list.push(FieldValue::from(self.build_nested(
                                &class,
                                key,
                                &desc.declared_type,
                                item,
                                intent,
                            )?));
                        }
                        FieldValue::List(list)
                    }
                    other => FieldValue::from(self.build_nested(
                        &class,
                        key,
                        &desc.declared_type,
                        other,
                        intent,
                    )?),
                };
                target.set(key.as_str(), nested);
                continue;
            }

            // The identity field lands here too; `Instance::key` follows it from now on.
            target.set(key.as_str(), FieldValue::Scalar(value.clone()));
        }
        Ok(())
    }

    fn build_nested(
        &self,
        owner: &str,
        field: &str,
        class: &str,
        raw: &Value,
        intent: Intent,
    ) -> Result<Instance, MaterializeError> {
        match raw {
            Value::Object(_) => self.build(class, raw, intent),
            other => Err(MaterializeError::UnexpectedShape {
                class: owner.to_string(),
                field: field.to_string(),
                found: json_kind(other),
            }),
        }
    }
}

fn check_identity(class: &str, target: &Instance, incoming: Option<&Value>) -> Result<(), MaterializeError> {
    let (Some(existing), Some(incoming)) = (target.id(), incoming) else {
        return Ok(());
    };
    if incoming.is_null() || EntityKey::from_id(existing) == EntityKey::from_id(incoming) {
        return Ok(());
    }
    Err(MaterializeError::IdentityConflict {
        class: class.to_string(),
        existing: existing.to_string(),
        incoming: incoming.to_string(),
    })
}
