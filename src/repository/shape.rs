//! Entity graph to storage write data.

use crate::entity::{FieldValue, Instance, Intent};
use crate::metadata::MetadataRegistry;
use serde_json::{json, Map, Value};

fn is_relation(metadata: &MetadataRegistry, class: &str, field: &str) -> bool {
    metadata.descriptor(class, field).is_some_and(|d| d.is_relation())
}

fn is_unset_identity(entity: &Instance, field: &str, value: &FieldValue) -> bool {
    entity.identity_field() == Some(field) && matches!(value, FieldValue::Scalar(Value::Null))
}

fn create_many(elements: impl Iterator<Item = Value>) -> Value {
    json!({ "createMany": { "data": elements.collect::<Vec<_>>() } })
}

/// Data for inserting `entity` and everything beneath it. Tracked collections contribute
/// their current elements, which for a never-persisted owner are exactly the pending
/// additions; nested entities become nested creates.
pub(crate) fn create_data(metadata: &MetadataRegistry, entity: &Instance) -> Map<String, Value> {
    let mut data = Map::new();
    for (name, value) in entity.fields() {
        if is_unset_identity(entity, name, value) {
            continue;
        }
        let relation = is_relation(metadata, entity.class(), name);
        match value {
            FieldValue::Scalar(Value::Null) if relation => continue,
            FieldValue::Scalar(v) => {
                data.insert(name.to_string(), v.clone());
            }
            FieldValue::Entity(e) => {
                data.insert(name.to_string(), json!({ "create": create_data(metadata, e) }));
            }
            FieldValue::Collection(c) => {
                if c.is_empty() {
                    continue;
                }
                let rows = c.iter().map(|e| Value::Object(create_data(metadata, e)));
                data.insert(name.to_string(), create_many(rows));
            }
            FieldValue::List(items) if relation => {
                let rows: Vec<Value> = items
                    .iter()
                    .filter_map(FieldValue::as_entity)
                    .map(|e| Value::Object(create_data(metadata, e)))
                    .collect();
                if !rows.is_empty() {
                    data.insert(name.to_string(), create_many(rows.into_iter()));
                }
            }
            FieldValue::List(_) => {
                data.insert(name.to_string(), value.to_json());
            }
        }
    }
    data
}

/// Data for updating `entity` in place: scalars plus nested singular entities shaped by
/// their intent. Collections are written separately from their delta views.
pub(crate) fn update_data(metadata: &MetadataRegistry, entity: &Instance, with_identity: bool) -> Map<String, Value> {
    let mut data = Map::new();
    for (name, value) in entity.fields() {
        if entity.identity_field() == Some(name) && !with_identity {
            continue;
        }
        let relation = is_relation(metadata, entity.class(), name);
        match value {
            FieldValue::Scalar(Value::Null) if relation => {}
            FieldValue::Scalar(v) => {
                data.insert(name.to_string(), v.clone());
            }
            FieldValue::Entity(e) => {
                data.insert(name.to_string(), nested_singular(metadata, e));
            }
            FieldValue::List(_) if relation => {}
            FieldValue::List(_) => {
                data.insert(name.to_string(), value.to_json());
            }
            FieldValue::Collection(_) => {}
        }
    }
    data
}

/// `{"create": ..}` or `{"update": ..}` for a nested singular entity. Untagged entities
/// choose by whether they carry an identity.
pub(crate) fn nested_singular(metadata: &MetadataRegistry, entity: &Instance) -> Value {
    let intent = entity.intent().unwrap_or(if entity.id().is_some() {
        Intent::Update
    } else {
        Intent::Create
    });
    match intent {
        Intent::Create => json!({ "create": create_data(metadata, entity) }),
        Intent::Update => json!({ "update": update_data(metadata, entity, true) }),
    }
}

/// Copy identities assigned by storage back into the graph that was just created.
/// `row` is the created record with nested creates attached under their relation names.
pub(crate) fn absorb_identities(entity: &mut Instance, row: &Value) {
    if entity.id().is_none() {
        if let Some(id) = entity.identity_field().and_then(|f| row.get(f)).filter(|v| !v.is_null()) {
            entity.set_identity(id.clone());
        }
    }
    let names: Vec<String> = entity.fields().map(|(k, _)| k.to_string()).collect();
    for name in names {
        let Some(nested) = row.get(&name) else { continue };
        match entity.get_mut(&name) {
            Some(FieldValue::Entity(e)) => absorb_identities(e, nested),
            Some(FieldValue::Collection(c)) => {
                if let Value::Array(rows) = nested {
                    for (element, r) in c.iter_mut().zip(rows) {
                        absorb_identities(element, r);
                    }
                }
            }
            Some(FieldValue::List(items)) => {
                if let Value::Array(rows) = nested {
                    let entities = items.iter_mut().filter_map(|v| match v {
                        FieldValue::Entity(e) => Some(e),
                        _ => None,
                    });
                    for (element, r) in entities.zip(rows) {
                        absorb_identities(element, r);
                    }
                }
            }
            _ => {}
        }
    }
}
