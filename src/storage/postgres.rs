//! PostgreSQL backend: runs built queries through sqlx and expands nested relation writes.

use crate::config::{RelationDirection, ResolvedModel, ResolvedRelation, StorageSchema};
use crate::error::StorageError;
use crate::storage::builder::{self, QueryBuf};
use crate::storage::row::row_to_json;
use crate::storage::{FindArgs, PgBindValue, StorageBackend, WriteOp};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    schema: Arc<StorageSchema>,
}

impl PgBackend {
    pub fn new(pool: PgPool, schema: Arc<StorageSchema>) -> Self {
        PgBackend { pool, schema }
    }

    pub fn schema(&self) -> &StorageSchema {
        &self.schema
    }

    fn model(&self, name: &str) -> Result<&ResolvedModel, StorageError> {
        self.schema
            .model(name)
            .ok_or_else(|| StorageError::UnknownModel(name.to_string()))
    }
}

async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Value>, StorageError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Value>, StorageError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    let row = query.fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| row_to_json(&r)))
}

/// Separate column values from nested relation writes.
fn split_data(
    model: &ResolvedModel,
    data: Map<String, Value>,
) -> Result<(Map<String, Value>, Vec<(&ResolvedRelation, Value)>), StorageError> {
    let mut scalars = Map::new();
    let mut nested = Vec::new();
    for (key, value) in data {
        if let Some(rel) = model.relation(&key) {
            nested.push((rel, value));
        } else if model.column_by_field(&key).is_some() {
            scalars.insert(key, value);
        } else {
            return Err(StorageError::InvalidArgument(format!(
                "{} has no field or relation '{}'",
                model.name, key
            )));
        }
    }
    Ok((scalars, nested))
}

fn object(value: Value, what: &str) -> Result<Map<String, Value>, StorageError> {
    match value {
        Value::Object(m) => Ok(m),
        other => Err(StorageError::InvalidArgument(format!("{} must be an object, got {}", what, other))),
    }
}

/// `{"create": x}` or `{"createMany": {"data": [..]}}` on a to-many relation, flattened.
fn to_many_creates(rel: &ResolvedRelation, value: Value) -> Result<Vec<Map<String, Value>>, StorageError> {
    let mut op = object(value, &rel.field)?;
    if let Some(many) = op.remove("createMany") {
        let mut many = object(many, "createMany")?;
        return match many.remove("data") {
            Some(Value::Array(items)) => items.into_iter().map(|v| object(v, &rel.field)).collect(),
            _ => Err(StorageError::InvalidArgument(format!("{}.createMany needs a data array", rel.field))),
        };
    }
    match op.remove("create") {
        Some(Value::Array(items)) => items.into_iter().map(|v| object(v, &rel.field)).collect(),
        Some(v) => Ok(vec![object(v, &rel.field)?]),
        None => Err(StorageError::InvalidArgument(format!(
            "unsupported nested write on to-many relation {}",
            rel.field
        ))),
    }
}

/// Write a to-one nested value and return the foreign key our row should hold.
fn write_to_one<'a>(
    conn: &'a mut PgConnection,
    schema: &'a StorageSchema,
    owner: &'a ResolvedModel,
    rel: &'a ResolvedRelation,
    value: Value,
    current: Option<&'a Value>,
) -> BoxFuture<'a, Result<(Value, Value), StorageError>> {
    Box::pin(async move {
        let related = schema
            .model(&rel.model)
            .ok_or_else(|| StorageError::UnknownModel(rel.model.clone()))?;
        if value.is_null() {
            return Ok((Value::Null, Value::Null));
        }
        let mut op = object(value, &rel.field)?;
        let written = if let Some(create) = op.remove("create") {
            insert_graph(conn, schema, related, object(create, &rel.field)?).await?
        } else if let Some(update) = op.remove("update") {
            let mut data = object(update, &rel.field)?;
            let filter = match data.remove(related.pk_field()) {
                Some(id) if !id.is_null() => {
                    let mut f = Map::new();
                    f.insert(related.pk_field().to_string(), id);
                    f
                }
                _ => {
                    let fk = current
                        .and_then(|row| row.get(owner.field_of(&rel.our_key)))
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| {
                            StorageError::InvalidArgument(format!("{}.{} has nothing to update", owner.name, rel.field))
                        })?;
                    let mut f = Map::new();
                    f.insert(related.field_of(&rel.their_key).to_string(), fk.clone());
                    f
                }
            };
            update_graph(conn, schema, related, filter, data).await?
        } else {
            return Err(StorageError::InvalidArgument(format!(
                "unsupported nested write on to-one relation {}",
                rel.field
            )));
        };
        let fk = written.get(related.field_of(&rel.their_key)).cloned().unwrap_or(Value::Null);
        Ok((fk, written))
    })
}

/// Insert `data` into `model`: to-one nested creates run first so our foreign key can be
/// set, to-many creates run after with their foreign key pointing back at us.
fn insert_graph<'a>(
    conn: &'a mut PgConnection,
    schema: &'a StorageSchema,
    model: &'a ResolvedModel,
    data: Map<String, Value>,
) -> BoxFuture<'a, Result<Value, StorageError>> {
    Box::pin(async move {
        let (mut scalars, nested) = split_data(model, data)?;
        let (to_one, to_many): (Vec<_>, Vec<_>) =
            nested.into_iter().partition(|(rel, _)| rel.direction == RelationDirection::ToOne);

        let mut attached = Map::new();
        for (rel, value) in to_one {
            let (fk, written) = write_to_one(&mut *conn, schema, model, rel, value, None).await?;
            scalars.insert(model.field_of(&rel.our_key).to_string(), fk);
            attached.insert(rel.field.clone(), written);
        }

        let q = builder::insert(model, &scalars)?;
        let mut row = fetch_optional(&mut *conn, &q)
            .await?
            .ok_or_else(|| StorageError::NotFound(model.name.clone()))?;

        for (rel, value) in to_many {
            let children = create_children(&mut *conn, schema, model, rel, &row, value).await?;
            attached.insert(rel.field.clone(), Value::Array(children));
        }
        if let Value::Object(m) = &mut row {
            m.extend(attached);
        }
        Ok(row)
    })
}

async fn create_children(
    conn: &mut PgConnection,
    schema: &StorageSchema,
    owner: &ResolvedModel,
    rel: &ResolvedRelation,
    owner_row: &Value,
    value: Value,
) -> Result<Vec<Value>, StorageError> {
    let related = schema
        .model(&rel.model)
        .ok_or_else(|| StorageError::UnknownModel(rel.model.clone()))?;
    let key = owner_row.get(owner.field_of(&rel.our_key)).cloned().unwrap_or(Value::Null);
    let mut out = Vec::new();
    for mut child in to_many_creates(rel, value)? {
        child.insert(related.field_of(&rel.their_key).to_string(), key.clone());
        out.push(insert_graph(&mut *conn, schema, related, child).await?);
    }
    Ok(out)
}

/// Update the row matching `filter` with `data`. Nested to-one writes run before the row
/// update, nested to-many creates after it.
fn update_graph<'a>(
    conn: &'a mut PgConnection,
    schema: &'a StorageSchema,
    model: &'a ResolvedModel,
    filter: Map<String, Value>,
    data: Map<String, Value>,
) -> BoxFuture<'a, Result<Value, StorageError>> {
    Box::pin(async move {
        let (mut scalars, nested) = split_data(model, data)?;
        let (to_one, to_many): (Vec<_>, Vec<_>) =
            nested.into_iter().partition(|(rel, _)| rel.direction == RelationDirection::ToOne);

        let current = if to_one.is_empty() {
            None
        } else {
            let q = builder::select(schema, model, &FindArgs { filter: filter.clone(), take: Some(1), ..Default::default() })?;
            fetch_optional(&mut *conn, &q).await?
        };

        let mut attached = Map::new();
        for (rel, value) in to_one {
            let (fk, written) = write_to_one(&mut *conn, schema, model, rel, value, current.as_ref()).await?;
            scalars.insert(model.field_of(&rel.our_key).to_string(), fk);
            attached.insert(rel.field.clone(), written);
        }

        let q = builder::update(model, &filter, &scalars)?;
        let mut row = fetch_optional(&mut *conn, &q)
            .await?
            .ok_or_else(|| StorageError::NotFound(model.name.clone()))?;

        for (rel, value) in to_many {
            let children = create_children(&mut *conn, schema, model, rel, &row, value).await?;
            attached.insert(rel.field.clone(), Value::Array(children));
        }
        if let Value::Object(m) = &mut row {
            m.extend(attached);
        }
        Ok(row)
    })
}

async fn delete_row(
    conn: &mut PgConnection,
    model: &ResolvedModel,
    filter: &Map<String, Value>,
) -> Result<Value, StorageError> {
    let q = builder::delete(model, filter)?;
    fetch_optional(conn, &q)
        .await?
        .ok_or_else(|| StorageError::NotFound(model.name.clone()))
}

#[async_trait]
impl StorageBackend for PgBackend {
    fn has_model(&self, model: &str) -> bool {
        self.schema.model(model).is_some()
    }

    async fn find_first(&self, model: &str, args: &FindArgs) -> Result<Option<Value>, StorageError> {
        let m = self.model(model)?;
        let args = FindArgs {
            take: Some(1),
            ..args.clone()
        };
        let q = builder::select(&self.schema, m, &args)?;
        let mut conn = self.pool.acquire().await?;
        fetch_optional(&mut *conn, &q).await
    }

    async fn find_many(&self, model: &str, args: &FindArgs) -> Result<Vec<Value>, StorageError> {
        let m = self.model(model)?;
        let q = builder::select(&self.schema, m, args)?;
        let mut conn = self.pool.acquire().await?;
        fetch_all(&mut *conn, &q).await
    }

    async fn count(&self, model: &str, filter: &Map<String, Value>) -> Result<u64, StorageError> {
        let m = self.model(model)?;
        let q = builder::count(m, filter)?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let row = query.fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("count")?;
        Ok(n.max(0) as u64)
    }

    async fn create(&self, model: &str, data: Map<String, Value>) -> Result<Value, StorageError> {
        Ok(self
            .transaction(vec![WriteOp::Create {
                model: model.to_string(),
                data,
            }])
            .await?
            .pop()
            .unwrap_or(Value::Null))
    }

    async fn update(
        &self,
        model: &str,
        filter: &Map<String, Value>,
        data: Map<String, Value>,
    ) -> Result<Value, StorageError> {
        Ok(self
            .transaction(vec![WriteOp::Update {
                model: model.to_string(),
                filter: filter.clone(),
                data,
            }])
            .await?
            .pop()
            .unwrap_or(Value::Null))
    }

    async fn delete(&self, model: &str, filter: &Map<String, Value>) -> Result<Value, StorageError> {
        let m = self.model(model)?;
        let mut conn = self.pool.acquire().await?;
        delete_row(&mut *conn, m, filter).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Value>, StorageError> {
        for op in &ops {
            self.model(op.model())?;
        }
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let row = match op {
                WriteOp::Create { model, data } => {
                    let m = self.model(&model)?;
                    insert_graph(&mut *tx, &self.schema, m, data).await?
                }
                WriteOp::Update { model, filter, data } => {
                    let m = self.model(&model)?;
                    update_graph(&mut *tx, &self.schema, m, filter, data).await?
                }
                WriteOp::Delete { model, filter } => {
                    let m = self.model(&model)?;
                    delete_row(&mut *tx, m, &filter).await?
                }
            };
            out.push(row);
        }
        tx.commit().await?;
        tracing::debug!(ops = out.len(), "transaction committed");
        Ok(out)
    }
}
