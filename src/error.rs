//! Typed errors for registries, mapping, materialization, planning and storage.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("class not registered: {0}")]
    UnknownClass(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("no mapping registered from '{from}' to '{to}'")]
    NotRegistered { from: String, to: String },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("mapping validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{field} holds a {found} where a collection element was expected")]
    UnexpectedElement { field: String, found: &'static str },
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("raw value for {class}.{field} has the wrong shape: got {found}")]
    UnexpectedShape {
        class: String,
        field: String,
        found: &'static str,
    },
    #[error("{class} already has identity {existing}; refusing to rehydrate it as {incoming}")]
    IdentityConflict {
        class: String,
        existing: String,
        incoming: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("class not registered: {0}")]
    UnknownClass(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Errors raised by a storage backend. The repository propagates these unchanged.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage model not found: {0}")]
    UnknownModel(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("record not found in {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("class '{0}' is not bound to a storage model")]
    ModelNotRegistered(String),
    #[error("class '{0}' has no identity field")]
    NoIdentity(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub(crate) fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
