//! Storage boundary: the backend contract the repository drives, plus the PostgreSQL backend.

mod builder;
mod params;
mod postgres;
mod row;

pub use builder::QueryBuf;
pub use params::PgBindValue;
pub use postgres::PgBackend;

use crate::error::StorageError;
use crate::planner::IncludeDirective;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Filter, ordering, pagination and include for a read. Filters are exact-match by
/// property name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindArgs {
    pub filter: Map<String, Value>,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u32>,
    pub take: Option<u32>,
    pub include: Option<IncludeDirective>,
}

impl FindArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(field.to_string(), value.into());
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u32) -> Self {
        self.take = Some(n);
        self
    }

    pub fn include(mut self, include: IncludeDirective) -> Self {
        self.include = Some(include);
        self
    }
}

/// One write in a transaction batch. `data` may carry nested relation writes:
/// `{"create": {...}}`, `{"update": {...}}` for to-one relations and
/// `{"createMany": {"data": [...]}}` for to-many relations.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Create {
        model: String,
        data: Map<String, Value>,
    },
    Update {
        model: String,
        filter: Map<String, Value>,
        data: Map<String, Value>,
    },
    Delete {
        model: String,
        filter: Map<String, Value>,
    },
}

impl WriteOp {
    pub fn model(&self) -> &str {
        match self {
            WriteOp::Create { model, .. } | WriteOp::Update { model, .. } | WriteOp::Delete { model, .. } => model,
        }
    }
}

/// Per-model delegate operations of a relational backend. Errors are passed through the
/// repository untouched.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn has_model(&self, model: &str) -> bool;

    async fn find_first(&self, model: &str, args: &FindArgs) -> Result<Option<Value>, StorageError>;

    async fn find_many(&self, model: &str, args: &FindArgs) -> Result<Vec<Value>, StorageError>;

    async fn count(&self, model: &str, filter: &Map<String, Value>) -> Result<u64, StorageError>;

    /// Insert one row, including nested creates. Returns the created row.
    async fn create(&self, model: &str, data: Map<String, Value>) -> Result<Value, StorageError>;

    /// Update the row matching `filter`. Returns the updated row.
    async fn update(
        &self,
        model: &str,
        filter: &Map<String, Value>,
        data: Map<String, Value>,
    ) -> Result<Value, StorageError>;

    /// Delete the row matching `filter`. Returns the deleted row.
    async fn delete(&self, model: &str, filter: &Map<String, Value>) -> Result<Value, StorageError>;

    /// Run `ops` in order inside one transaction; any failure rolls back all of them.
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Value>, StorageError>;
}
