//! `Instance`: a mapped class value whose properties are held by name.

use super::collection::{Tracked, TrackedCollection};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Write intent tagged onto every entity built by one materialization call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Create,
    Update,
}

/// Identity used for change tracking: the public id once set, the construction token before.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Id(String),
    Token(Uuid),
}

impl EntityKey {
    /// Ids compare by their text: the string `"1"` and the number `1` are the same key, so an
    /// id echoed back by storage in a different JSON type still matches the held element.
    pub(crate) fn from_id(v: &Value) -> Self {
        match v {
            Value::String(s) => EntityKey::Id(s.clone()),
            other => EntityKey::Id(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Entity(Box<Instance>),
    /// Plain array; elements are scalars or entities.
    List(Vec<FieldValue>),
    Collection(TrackedCollection<Instance>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Instance> {
        match self {
            FieldValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&TrackedCollection<Instance>> {
        match self {
            FieldValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Plain JSON view; collections render their current elements.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Scalar(v) => v.clone(),
            FieldValue::Entity(e) => e.to_json(),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Collection(c) => Value::Array(c.iter().map(Instance::to_json).collect()),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Scalar(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Scalar(Value::String(v.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Scalar(Value::String(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Scalar(Value::from(v))
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Scalar(Value::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Scalar(Value::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Scalar(Value::Bool(v))
    }
}

impl From<Instance> for FieldValue {
    fn from(v: Instance) -> Self {
        FieldValue::Entity(Box::new(v))
    }
}

impl From<TrackedCollection<Instance>> for FieldValue {
    fn from(v: TrackedCollection<Instance>) -> Self {
        FieldValue::Collection(v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    class: String,
    identity_field: Option<String>,
    fields: IndexMap<String, FieldValue>,
    /// Assigned at construction; clones share it.
    token: Uuid,
    intent: Option<Intent>,
}

impl Instance {
    /// Bare instance with no properties set. Prefer `MetadataRegistry::instantiate`, which also
    /// seeds empty collections for collection-valued properties.
    pub fn new(class: impl Into<String>, identity_field: Option<&str>) -> Self {
        Instance {
            class: class.into(),
            identity_field: identity_field.map(str::to_string),
            fields: IndexMap::new(),
            token: Uuid::new_v4(),
            intent: None,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn identity_field(&self) -> Option<&str> {
        self.identity_field.as_deref()
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn set_intent(&mut self, intent: Intent) {
        self.intent = Some(intent);
    }

    /// Public identity, if set and not null.
    pub fn id(&self) -> Option<&Value> {
        let field = self.identity_field.as_deref()?;
        match self.fields.get(field) {
            Some(FieldValue::Scalar(Value::Null)) | None => None,
            Some(FieldValue::Scalar(v)) => Some(v),
            Some(_) => None,
        }
    }

    /// Assign the public identity. Change tracking switches from the token to this value.
    pub fn set_identity(&mut self, id: Value) {
        if let Some(field) = self.identity_field.clone() {
            self.fields.insert(field, FieldValue::Scalar(id));
        }
    }

    pub fn key(&self) -> EntityKey {
        match self.id() {
            Some(v) => EntityKey::from_id(v),
            None => EntityKey::Token(self.token),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(FieldValue::as_scalar)
    }

    pub fn entity(&self, name: &str) -> Option<&Instance> {
        self.get(name).and_then(FieldValue::as_entity)
    }

    pub fn collection(&self, name: &str) -> Option<&TrackedCollection<Instance>> {
        self.get(name).and_then(FieldValue::as_collection)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut TrackedCollection<Instance>> {
        match self.fields.get_mut(name) {
            Some(FieldValue::Collection(c)) => Some(c),
            _ => None,
        }
    }

    /// Plain JSON object of every set property.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        Value::Object(map)
    }

    /// Mark every tracked collection in this graph as synchronized with storage.
    pub fn commit(&mut self) {
        for (_, value) in self.fields_mut() {
            commit_value(value);
        }
    }
}

fn commit_value(value: &mut FieldValue) {
    match value {
        FieldValue::Entity(e) => e.commit(),
        FieldValue::List(items) => items.iter_mut().for_each(commit_value),
        FieldValue::Collection(c) => {
            c.commit();
            c.iter_mut().for_each(Instance::commit);
        }
        FieldValue::Scalar(_) => {}
    }
}

impl Tracked for Instance {
    type Key = EntityKey;

    fn tracking_key(&self) -> EntityKey {
        self.key()
    }
}
