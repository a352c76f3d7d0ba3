//! Reads and writes entity graphs through a storage backend.
//!
//! Reads plan their includes from class metadata and rebuild entities from the returned
//! rows. Writes create a whole graph at once for unpersisted entities, and otherwise update
//! the entity and replay its tracked collection deltas inside one transaction.

mod shape;

use crate::config::{validate_bindings, AdditionPolicy, RepositoryOptions, StorageSchema};
use crate::entity::{EntityKey, FieldValue, Instance, Intent, View};
use crate::error::{RepositoryError, StorageError};
use crate::runtime::OrmContext;
use crate::storage::{FindArgs, StorageBackend, WriteOp};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Repository<B> {
    ctx: Arc<OrmContext>,
    backend: B,
    /// class -> storage model
    models: HashMap<String, String>,
    options: RepositoryOptions,
}

fn id_filter(field: &str, id: Value) -> Map<String, Value> {
    let mut filter = Map::new();
    filter.insert(field.to_string(), id);
    filter
}

impl<B: StorageBackend> Repository<B> {
    pub fn new(ctx: Arc<OrmContext>, backend: B, options: RepositoryOptions) -> Self {
        Repository {
            ctx,
            backend,
            models: HashMap::new(),
            options,
        }
    }

    /// Persist `class` through storage model `model`.
    pub fn bind(&mut self, class: &str, model: &str) -> &mut Self {
        self.models.insert(class.to_string(), model.to_string());
        self
    }

    /// Bind every model of a resolved storage schema to its class, after checking that each
    /// class's relation properties exist in its model.
    pub fn bind_schema(&mut self, schema: &StorageSchema) -> Result<&mut Self, RepositoryError> {
        validate_bindings(self.ctx.metadata(), schema)?;
        for (class, model) in schema.bindings() {
            self.bind(class, model);
        }
        Ok(self)
    }

    pub fn context(&self) -> &OrmContext {
        &self.ctx
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// Storage model for `class`; unbound classes and models the backend does not know are
    /// both configuration errors.
    pub fn model_for(&self, class: &str) -> Result<&str, RepositoryError> {
        match self.models.get(class) {
            Some(model) if self.backend.has_model(model) => Ok(model),
            _ => Err(RepositoryError::ModelNotRegistered(class.to_string())),
        }
    }

    fn identity_field(&self, class: &str) -> Result<String, RepositoryError> {
        self.ctx
            .metadata()
            .context(class)
            .and_then(|c| c.identity_field.clone())
            .ok_or_else(|| RepositoryError::NoIdentity(class.to_string()))
    }

    /// Fill in the planned include unless the caller supplied one.
    fn with_plan(&self, class: &str, mut args: FindArgs, list_mode: bool) -> Result<FindArgs, RepositoryError> {
        if args.include.is_none() {
            let depth = if list_mode {
                self.options.list_read_depth
            } else {
                self.options.single_read_depth
            };
            let plan = self.ctx.planner().plan(class, depth, list_mode)?;
            if plan.relations().next().is_some() {
                args.include = Some(plan);
            }
        }
        Ok(args)
    }

    fn hydrate(&self, class: &str, row: &Value) -> Result<Instance, RepositoryError> {
        Ok(self.ctx.materializer().build(class, row, Intent::Update)?)
    }

    pub async fn find_by_id(&self, class: &str, id: impl Into<Value>) -> Result<Option<Instance>, RepositoryError> {
        self.model_for(class)?;
        let field = self.identity_field(class)?;
        self.find_first(class, FindArgs::new().where_eq(&field, id)).await
    }

    /// Single read by a unique key; the filter must not be empty.
    pub async fn find_unique(
        &self,
        class: &str,
        filter: Map<String, Value>,
    ) -> Result<Option<Instance>, RepositoryError> {
        if filter.is_empty() {
            return Err(StorageError::InvalidArgument(format!("find_unique on {} needs a filter", class)).into());
        }
        self.find_first(
            class,
            FindArgs {
                filter,
                ..FindArgs::default()
            },
        )
        .await
    }

    /// Single read with the full (depth-bounded) relation graph.
    pub async fn find_first(&self, class: &str, args: FindArgs) -> Result<Option<Instance>, RepositoryError> {
        let model = self.model_for(class)?;
        let args = self.with_plan(class, args, false)?;
        match self.backend.find_first(model, &args).await? {
            Some(row) => Ok(Some(self.hydrate(class, &row)?)),
            None => Ok(None),
        }
    }

    /// List read; collection relations are fetched one level deep.
    pub async fn find_many(&self, class: &str, args: FindArgs) -> Result<Vec<Instance>, RepositoryError> {
        let model = self.model_for(class)?;
        let args = self.with_plan(class, args, true)?;
        let rows = self.backend.find_many(model, &args).await?;
        rows.iter().map(|row| self.hydrate(class, row)).collect()
    }

    pub async fn count(&self, class: &str, filter: &Map<String, Value>) -> Result<u64, RepositoryError> {
        let model = self.model_for(class)?;
        Ok(self.backend.count(model, filter).await?)
    }

    pub async fn delete(&self, class: &str, id: impl Into<Value>) -> Result<(), RepositoryError> {
        let model = self.model_for(class)?;
        let field = self.identity_field(class)?;
        self.backend.delete(model, &id_filter(&field, id.into())).await?;
        Ok(())
    }

    /// Create `entity` when it has no identity, otherwise update it and write its collection
    /// deltas. On success every tracked collection in the graph is committed, and elements
    /// inserted along the way carry the identities storage assigned them.
    pub async fn save(&self, entity: &mut Instance) -> Result<(), RepositoryError> {
        if entity.identity_field().is_none() {
            return Err(RepositoryError::NoIdentity(entity.class().to_string()));
        }
        let model = self.model_for(entity.class())?;

        if entity.id().is_none() {
            let data = shape::create_data(self.ctx.metadata(), entity);
            tracing::debug!(class = entity.class(), model, "create");
            let row = self.backend.create(model, data).await?;
            shape::absorb_identities(entity, &row);
            entity.set_intent(Intent::Update);
        } else {
            let mut plan = UpdatePlan::default();
            self.plan_update(entity, &[], &mut plan)?;
            tracing::debug!(
                class = entity.class(),
                ops = plan.ops.len(),
                inserts = plan.insertions.len(),
                "update transaction"
            );
            let rows = self.backend.transaction(plan.ops).await?;
            for insertion in &plan.insertions {
                if let Some(row) = rows.get(insertion.op) {
                    absorb_inserted(entity, insertion, row);
                }
            }
        }
        entity.commit();
        Ok(())
    }

    /// Update of `entity` followed by the deletes and updates its collection deltas call for.
    /// `path` leads from the saved root to `entity` through collection elements.
    fn plan_update(
        &self,
        entity: &Instance,
        path: &[(String, EntityKey)],
        plan: &mut UpdatePlan,
    ) -> Result<(), RepositoryError> {
        let class = entity.class();
        let model = self.model_for(class)?.to_string();
        let (Some(id_field), Some(id)) = (entity.identity_field(), entity.id()) else {
            return Err(RepositoryError::NoIdentity(class.to_string()));
        };
        let metadata = self.ctx.metadata();
        let mut data = shape::update_data(metadata, entity, false);
        let mut inserted: Vec<(String, Vec<EntityKey>)> = Vec::new();

        // Only elements without a public identity are new rows; identified additions are
        // already stored and get updated below.
        for (name, value) in entity.fields() {
            let FieldValue::Collection(collection) = value else { continue };
            let pending: Vec<&Instance> = collection
                .view(View::Added)
                .iter()
                .filter_map(|e| collection.get(&e.key()))
                .filter(|e| e.id().is_none())
                .collect();
            if pending.is_empty() {
                continue;
            }
            match self.options.addition_policy {
                AdditionPolicy::Skip => tracing::warn!(
                    class,
                    relation = name,
                    count = pending.len(),
                    "elements added to a persisted collection are not written"
                ),
                AdditionPolicy::Insert => {
                    let rows: Vec<Value> = pending
                        .iter()
                        .map(|e| Value::Object(shape::create_data(metadata, e)))
                        .collect();
                    data.insert(name.to_string(), json!({ "createMany": { "data": rows } }));
                    inserted.push((name.to_string(), pending.iter().map(|e| e.key()).collect()));
                }
            }
        }

        let op = plan.ops.len();
        plan.ops.push(WriteOp::Update {
            model,
            filter: id_filter(id_field, id.clone()),
            data,
        });
        for (relation, keys) in inserted {
            plan.insertions.push(Insertion {
                op,
                path: path.to_vec(),
                relation,
                keys,
            });
        }

        for (name, value) in entity.fields() {
            let FieldValue::Collection(collection) = value else { continue };
            let added: Vec<EntityKey> = collection.view(View::Added).iter().map(Instance::key).collect();

            for removed in collection.view(View::Removed) {
                if added.contains(&removed.key()) {
                    continue;
                }
                let (Some(field), Some(rid)) = (removed.identity_field(), removed.id()) else {
                    continue;
                };
                plan.ops.push(WriteOp::Delete {
                    model: self.model_for(removed.class())?.to_string(),
                    filter: id_filter(field, rid.clone()),
                });
            }

            let mut touched: Vec<EntityKey> = added
                .iter()
                .filter(|k| collection.get(k).is_some_and(|e| e.id().is_some()))
                .cloned()
                .collect();
            for updated in collection.view(View::Updated) {
                let key = updated.key();
                if !added.contains(&key) && !touched.contains(&key) {
                    touched.push(key);
                }
            }
            for key in touched {
                let Some(latest) = collection.get(&key) else { continue };
                if latest.id().is_none() {
                    continue;
                }
                let mut nested = path.to_vec();
                nested.push((name.to_string(), key));
                self.plan_update(latest, &nested, plan)?;
            }
        }
        Ok(())
    }
}

/// Collection elements written through a nested `createMany` of one planned update.
#[derive(Debug)]
struct Insertion {
    /// Index of the update in the transaction.
    op: usize,
    path: Vec<(String, EntityKey)>,
    relation: String,
    /// Tracking keys of the inserted elements, in `createMany` order.
    keys: Vec<EntityKey>,
}

#[derive(Debug, Default)]
struct UpdatePlan {
    ops: Vec<WriteOp>,
    insertions: Vec<Insertion>,
}

/// Copy the identities storage assigned to inserted elements back into the graph. `row` is
/// the updated record with created children attached under their relation names.
fn absorb_inserted(root: &mut Instance, insertion: &Insertion, row: &Value) {
    let mut target = root;
    for (relation, key) in &insertion.path {
        match target.collection_mut(relation).and_then(|c| c.get_mut(key)) {
            Some(next) => target = next,
            None => return,
        }
    }
    let Some(Value::Array(created)) = row.get(&insertion.relation) else { return };
    let Some(collection) = target.collection_mut(&insertion.relation) else { return };
    for (key, created) in insertion.keys.iter().zip(created) {
        if let Some(element) = collection.get_mut(key) {
            shape::absorb_identities(element, created);
        }
    }
}
