//! Raw config types matching the JSON files (`classes.json`, `models.json`).

use crate::metadata::{CompositionAction, CompositionKind};
use serde::{Deserialize, Serialize};

/// One mapped class: its properties and, for entities, the identity property.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    /// Scalar type name, or the nested/element class for composite properties.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub kind: CompositionKind,
    #[serde(default)]
    pub action: CompositionAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    /// We hold the foreign key to them.
    ToOne,
    /// They hold the foreign key to us.
    ToMany,
}

/// One storage model: the table an entity class persists to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Class persisted by this model. Defaults to the model name.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

fn default_schema() -> String {
    "public".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// Property name; defaults to the camelCase form of the column name.
    #[serde(default)]
    pub field: Option<String>,
    /// PostgreSQL type used for parameter casts, e.g. "uuid", "timestamptz", "sample.status".
    #[serde(default, rename = "type")]
    pub pg_type: Option<String>,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    #[serde(default)]
    pub has_default: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Property name on the owning class.
    pub name: String,
    pub model: String,
    pub direction: RelationDirection,
    /// Our column used in the join (our FK for to_one; our key for to_many).
    pub our_key: String,
    /// Their column used in the join (their key for to_one; their FK for to_many).
    pub their_key: String,
}

/// All config in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}
