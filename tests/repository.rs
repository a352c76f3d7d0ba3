use async_trait::async_trait;
use relkit::{
    AdditionPolicy, ClassDef, EntityKey, FieldValue, FindArgs, Instance, Intent, MappingPairRegistry, MappingProfile,
    OrmContext, PropertyDef, Repository, RepositoryError, RepositoryOptions, StorageBackend, StorageError, View,
    WriteOp,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

const CLASSES: &[ClassDef] = &[
    ClassDef {
        name: "Customer",
        identity: Some("id"),
        properties: &[PropertyDef::scalar("id", "number"), PropertyDef::scalar("name", "string")],
    },
    ClassDef {
        name: "Product",
        identity: Some("id"),
        properties: &[PropertyDef::scalar("id", "number"), PropertyDef::scalar("title", "string")],
    },
    ClassDef {
        name: "Line",
        identity: Some("id"),
        properties: &[
            PropertyDef::scalar("id", "number"),
            PropertyDef::scalar("sku", "string"),
            PropertyDef::scalar("qty", "number"),
            PropertyDef::entity("product", "Product"),
        ],
    },
    ClassDef {
        name: "Order",
        identity: Some("id"),
        properties: &[
            PropertyDef::scalar("id", "number"),
            PropertyDef::scalar("status", "string"),
            PropertyDef::entity("customer", "Customer"),
            PropertyDef::collection("lines", "Line"),
        ],
    },
    ClassDef {
        name: "LineView",
        identity: None,
        properties: &[PropertyDef::scalar("sku", "string"), PropertyDef::scalar("qty", "number")],
    },
    ClassDef {
        name: "OrderView",
        identity: None,
        properties: &[
            PropertyDef::scalar("id", "number"),
            PropertyDef::scalar("status", "string"),
            PropertyDef::collection("lines", "LineView"),
        ],
    },
];

struct Views;

impl MappingProfile for Views {
    fn configure(&self, pairs: &mut MappingPairRegistry) {
        pairs.create_map("Line", "LineView");
        pairs
            .create_map("Order", "OrderView")
            .for_member("status", |o| FieldValue::from(format!("#{}", o.scalar("status").and_then(Value::as_str).unwrap_or(""))));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    FindFirst(String, FindArgs),
    FindMany(String, FindArgs),
    Count(String, Map<String, Value>),
    Create(String, Map<String, Value>),
    Delete(String, Map<String, Value>),
    Transaction(Vec<WriteOp>),
}

/// Records every call and serves canned rows.
#[derive(Debug)]
struct Recorder {
    models: Vec<&'static str>,
    rows: Vec<(&'static str, Value)>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
    fail_writes: bool,
}

impl Recorder {
    fn new(rows: Vec<(&'static str, Value)>) -> Self {
        Recorder {
            models: vec!["orders", "order_lines", "customers", "products"],
            rows,
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
            fail_writes: false,
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls").push(call);
    }

    fn matching(&self, model: &str, filter: &Map<String, Value>) -> Vec<Value> {
        self.rows
            .iter()
            .filter(|(m, row)| *m == model && filter.iter().all(|(k, v)| row.get(k) == Some(v)))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Echo `data` back as the created row, assigning ids and expanding nested creates.
    fn created(&self, data: &Map<String, Value>) -> Value {
        let mut row = Map::new();
        row.insert("id".into(), json!(self.next_id.fetch_add(1, Ordering::SeqCst)));
        for (k, v) in data {
            let value = match v {
                Value::Object(op) if op.contains_key("create") => match &op["create"] {
                    Value::Object(inner) => self.created(inner),
                    other => other.clone(),
                },
                Value::Object(op) if op.contains_key("createMany") => {
                    let items = op["createMany"]["data"].as_array().cloned().unwrap_or_default();
                    Value::Array(
                        items
                            .iter()
                            .filter_map(Value::as_object)
                            .map(|m| self.created(m))
                            .collect(),
                    )
                }
                other => other.clone(),
            };
            row.insert(k.clone(), value);
        }
        Value::Object(row)
    }
}

#[async_trait]
impl StorageBackend for Recorder {
    fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| *m == model)
    }

    async fn find_first(&self, model: &str, args: &FindArgs) -> Result<Option<Value>, StorageError> {
        self.record(Call::FindFirst(model.into(), args.clone()));
        Ok(self.matching(model, &args.filter).into_iter().next())
    }

    async fn find_many(&self, model: &str, args: &FindArgs) -> Result<Vec<Value>, StorageError> {
        self.record(Call::FindMany(model.into(), args.clone()));
        Ok(self.matching(model, &args.filter))
    }

    async fn count(&self, model: &str, filter: &Map<String, Value>) -> Result<u64, StorageError> {
        self.record(Call::Count(model.into(), filter.clone()));
        Ok(self.matching(model, filter).len() as u64)
    }

    async fn create(&self, model: &str, data: Map<String, Value>) -> Result<Value, StorageError> {
        if self.fail_writes {
            return Err(StorageError::InvalidArgument("unique violation".into()));
        }
        let row = self.created(&data);
        self.record(Call::Create(model.into(), data));
        Ok(row)
    }

    async fn update(
        &self,
        model: &str,
        filter: &Map<String, Value>,
        data: Map<String, Value>,
    ) -> Result<Value, StorageError> {
        self.transaction(vec![WriteOp::Update {
            model: model.into(),
            filter: filter.clone(),
            data,
        }])
        .await
        .map(|mut rows| rows.pop().unwrap_or(Value::Null))
    }

    async fn delete(&self, model: &str, filter: &Map<String, Value>) -> Result<Value, StorageError> {
        self.record(Call::Delete(model.into(), filter.clone()));
        Ok(Value::Object(filter.clone()))
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Value>, StorageError> {
        if self.fail_writes {
            return Err(StorageError::NotFound("orders".into()));
        }
        // Rows shaped like PgBackend's: updates come back with their created children attached.
        let out = ops
            .iter()
            .map(|op| match op {
                WriteOp::Create { data, .. } => self.created(data),
                WriteOp::Update { filter, data, .. } => {
                    let mut row = obj(self.created(data));
                    row.extend(filter.clone());
                    Value::Object(row)
                }
                WriteOp::Delete { filter, .. } => Value::Object(filter.clone()),
            })
            .collect();
        self.record(Call::Transaction(ops));
        Ok(out)
    }
}

fn context() -> Arc<OrmContext> {
    Arc::new(OrmContext::from_parts(CLASSES, None, &[&Views]).expect("context"))
}

fn stored_order() -> Value {
    json!({
        "id": 1,
        "status": "open",
        "customerId": 9,
        "customer": {"id": 9, "name": "Ada"},
        "lines": [
            {"id": 10, "sku": "A", "qty": 1, "product": {"id": 50, "title": "Pen"}},
            {"id": 11, "sku": "B", "qty": 2, "product": null}
        ]
    })
}

fn repository(backend: Recorder, options: RepositoryOptions) -> Repository<Recorder> {
    let mut repo = Repository::new(context(), backend, options);
    repo.bind("Order", "orders")
        .bind("Line", "order_lines")
        .bind("Customer", "customers")
        .bind("Product", "products");
    repo
}

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn single_read_plans_full_graph_and_hydrates() {
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), RepositoryOptions::default());
    let order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    let calls = repo.backend().calls();
    let Call::FindFirst(model, args) = &calls[0] else { panic!("unexpected call {:?}", calls[0]) };
    assert_eq!(model, "orders");
    assert_eq!(args.filter, obj(json!({"id": 1})));
    let include = args.include.as_ref().expect("include");
    assert_eq!(include.to_json(), json!({"customer": true, "lines": {"include": {"product": true}}}));

    assert_eq!(order.intent(), Some(Intent::Update));
    assert_eq!(order.entity("customer").and_then(|c| c.scalar("name")), Some(&json!("Ada")));
    let lines = order.collection("lines").expect("lines");
    assert_eq!(lines.len(), 2);
    assert!(!lines.has_changes());
    let pen = lines.get(&EntityKey::Id("10".into())).and_then(|l| l.entity("product"));
    assert_eq!(pen.and_then(|p| p.scalar("title")), Some(&json!("Pen")));
}

#[tokio::test]
async fn list_read_keeps_collections_shallow() {
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), RepositoryOptions::default());
    let orders = repo.find_many("Order", FindArgs::new().take(10)).await.expect("list");
    assert_eq!(orders.len(), 1);

    let calls = repo.backend().calls();
    let Call::FindMany(_, args) = &calls[0] else { panic!("unexpected call {:?}", calls[0]) };
    assert_eq!(args.take, Some(10));
    assert_eq!(
        args.include.as_ref().map(|i| i.to_json()),
        Some(json!({"customer": true, "lines": true}))
    );
}

#[tokio::test]
async fn missing_row_is_none_and_count_passes_filter() {
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), RepositoryOptions::default());
    assert!(repo.find_by_id("Order", 2).await.expect("read").is_none());
    assert_eq!(repo.count("Order", &obj(json!({"status": "open"}))).await.expect("count"), 1);
    assert!(repo.find_unique("Order", Map::new()).await.is_err());
}

#[tokio::test]
async fn unbound_or_unknown_models_are_configuration_errors() {
    let mut repo = repository(Recorder::new(Vec::new()), RepositoryOptions::default());
    let err = repo.find_by_id("OrderView", 1).await.unwrap_err();
    assert!(matches!(err, RepositoryError::ModelNotRegistered(ref c) if c == "OrderView"));

    repo.bind("Customer", "people");
    let err = repo.count("Customer", &Map::new()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::ModelNotRegistered(_)));
    assert!(repo.backend().calls().is_empty());
}

#[tokio::test]
async fn save_creates_whole_graph_and_writes_back_identities() {
    let repo = repository(Recorder::new(Vec::new()), RepositoryOptions::default());
    let metadata = repo.context().metadata();

    let mut order = metadata.instantiate("Order").expect("order");
    let mut customer = metadata.instantiate("Customer").expect("customer");
    customer.set("name", "Bo");
    order.set("status", "new").set("customer", customer);
    for sku in ["A", "B"] {
        let mut line = metadata.instantiate("Line").expect("line");
        line.set("sku", sku).set("qty", 1);
        order.collection_mut("lines").expect("lines").add(line);
    }

    repo.save(&mut order).await.expect("save");

    let calls = repo.backend().calls();
    assert_eq!(
        calls,
        vec![Call::Create(
            "orders".into(),
            obj(json!({
                "status": "new",
                "customer": {"create": {"name": "Bo"}},
                "lines": {"createMany": {"data": [{"sku": "A", "qty": 1}, {"sku": "B", "qty": 1}]}}
            }))
        )]
    );
    assert!(order.id().is_some());
    assert!(order.entity("customer").and_then(Instance::id).is_some());
    let lines = order.collection("lines").expect("lines");
    assert!(!lines.has_changes());
    assert!(lines.iter().all(|l| matches!(l.key(), EntityKey::Id(_))));
}

#[tokio::test]
async fn save_on_persisted_entity_writes_deltas_in_one_transaction() {
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), RepositoryOptions::default());
    let metadata = repo.context().metadata();
    let mut order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    order.set("status", "paid");
    let lines = order.collection_mut("lines").expect("lines");
    let mut changed = lines.get(&EntityKey::Id("10".into())).cloned().expect("line 10");
    changed.set("qty", 5);
    lines.add(changed);
    let gone = lines.get(&EntityKey::Id("11".into())).cloned().expect("line 11");
    lines.remove(&gone);
    let mut fresh = metadata.instantiate("Line").expect("line");
    fresh.set("sku", "C");
    lines.add(fresh);

    repo.save(&mut order).await.expect("save");

    let calls = repo.backend().calls();
    let Some(Call::Transaction(ops)) = calls.last() else { panic!("no transaction: {calls:?}") };
    assert_eq!(ops.len(), 3);
    assert_eq!(
        ops[0],
        WriteOp::Update {
            model: "orders".into(),
            filter: obj(json!({"id": 1})),
            data: obj(json!({
                "status": "paid",
                "customer": {"update": {"id": 9, "name": "Ada"}}
            })),
        }
    );
    assert_eq!(
        ops[1],
        WriteOp::Delete {
            model: "order_lines".into(),
            filter: obj(json!({"id": 11})),
        }
    );
    let WriteOp::Update { model, filter, data } = &ops[2] else { panic!("expected update: {:?}", ops[2]) };
    assert_eq!(model, "order_lines");
    assert_eq!(filter, &obj(json!({"id": 10})));
    assert_eq!(data.get("qty"), Some(&json!(5)));
    assert_eq!(data.get("product"), Some(&json!({"update": {"id": 50, "title": "Pen"}})));

    assert!(!order.collection("lines").expect("lines").has_changes());
}

#[tokio::test]
async fn insert_policy_adds_new_elements_to_the_update() {
    let options = RepositoryOptions {
        addition_policy: AdditionPolicy::Insert,
        ..RepositoryOptions::default()
    };
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), options);
    let metadata = repo.context().metadata();
    let mut order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    let mut fresh = metadata.instantiate("Line").expect("line");
    fresh.set("sku", "C");
    let mut dropped = metadata.instantiate("Line").expect("line");
    dropped.set("sku", "D");
    let lines = order.collection_mut("lines").expect("lines");
    lines.add(fresh);
    lines.add(dropped.clone());
    lines.remove(&dropped);

    repo.save(&mut order).await.expect("save");

    let calls = repo.backend().calls();
    let Some(Call::Transaction(ops)) = calls.last() else { panic!("no transaction: {calls:?}") };
    assert_eq!(ops.len(), 1, "an element added then removed is neither created nor deleted");
    let WriteOp::Update { data, .. } = &ops[0] else { panic!("expected update") };
    assert_eq!(data.get("lines"), Some(&json!({"createMany": {"data": [{"sku": "C"}]}})));
}

#[tokio::test]
async fn inserted_elements_take_stored_identity_and_can_be_deleted_later() {
    let options = RepositoryOptions {
        addition_policy: AdditionPolicy::Insert,
        ..RepositoryOptions::default()
    };
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), options);
    let metadata = repo.context().metadata();
    let mut order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    let mut fresh = metadata.instantiate("Line").expect("line");
    fresh.set("sku", "C");
    order.collection_mut("lines").expect("lines").add(fresh);
    repo.save(&mut order).await.expect("first save");

    let lines = order.collection("lines").expect("lines");
    let inserted = lines
        .iter()
        .find(|l| l.scalar("sku") == Some(&json!("C")))
        .cloned()
        .expect("inserted line");
    let id = inserted.id().cloned().expect("identity written back");
    assert!(matches!(inserted.key(), EntityKey::Id(_)));

    order.collection_mut("lines").expect("lines").remove(&inserted);
    repo.save(&mut order).await.expect("second save");

    let calls = repo.backend().calls();
    let Some(Call::Transaction(ops)) = calls.last() else { panic!("no transaction: {calls:?}") };
    assert_eq!(ops.len(), 2);
    assert_eq!(
        ops[1],
        WriteOp::Delete {
            model: "order_lines".into(),
            filter: obj(json!({ "id": id })),
        }
    );
}

#[tokio::test]
async fn removed_then_re_added_element_is_updated_not_inserted() {
    let options = RepositoryOptions {
        addition_policy: AdditionPolicy::Insert,
        ..RepositoryOptions::default()
    };
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), options);
    let mut order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    let lines = order.collection_mut("lines").expect("lines");
    let mut line = lines.get(&EntityKey::Id("10".into())).cloned().expect("line 10");
    lines.remove(&line);
    line.set("qty", 3);
    lines.add(line);

    repo.save(&mut order).await.expect("save");

    let calls = repo.backend().calls();
    let Some(Call::Transaction(ops)) = calls.last() else { panic!("no transaction: {calls:?}") };
    assert_eq!(ops.len(), 2, "no insert and no delete: {ops:?}");
    let WriteOp::Update { data, .. } = &ops[0] else { panic!("expected update") };
    assert!(data.get("lines").is_none());
    let WriteOp::Update { model, filter, data } = &ops[1] else { panic!("expected update: {:?}", ops[1]) };
    assert_eq!(model, "order_lines");
    assert_eq!(filter, &obj(json!({"id": 10})));
    assert_eq!(data.get("qty"), Some(&json!(3)));
    assert_eq!(order.collection("lines").map(|l| l.len()), Some(2));
}

#[tokio::test]
async fn bind_schema_rejects_relations_missing_from_storage() {
    let config: relkit::FullConfig = serde_json::from_value(json!({
        "classes": [],
        "models": [
            {"name": "orders", "class": "Order", "table": "orders", "primary_key": "id",
             "columns": [{"name": "id"}, {"name": "status"}, {"name": "customer_id"}],
             "relations": [{"name": "customer", "model": "customers", "direction": "to_one",
                            "our_key": "customer_id", "their_key": "id"}]},
            {"name": "customers", "class": "Customer", "table": "customers", "primary_key": "id",
             "columns": [{"name": "id"}, {"name": "name"}]}
        ]
    }))
    .expect("config");
    let schema = relkit::resolve(&config).expect("schema");

    let mut repo = Repository::new(context(), Recorder::new(Vec::new()), RepositoryOptions::default());
    let err = repo.bind_schema(&schema).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Config(relkit::ConfigError::MissingReference { kind: "relation", ref id })
            if id == "orders.lines"
    ));
    assert!(repo.model_for("Order").is_err(), "nothing is bound after a failed check");
}

#[tokio::test]
async fn storage_errors_propagate_and_leave_deltas_pending() {
    let mut backend = Recorder::new(vec![("orders", stored_order())]);
    backend.fail_writes = true;
    let repo = repository(backend, RepositoryOptions::default());
    let mut order = repo.find_by_id("Order", 1).await.expect("read").expect("found");
    let lines = order.collection_mut("lines").expect("lines");
    let gone = lines.get(&EntityKey::Id("10".into())).cloned().expect("line");
    lines.remove(&gone);

    let err = repo.save(&mut order).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Storage(StorageError::NotFound(_))));
    let lines = order.collection("lines").expect("lines");
    assert_eq!(lines.view(View::Removed).len(), 1);
}

#[tokio::test]
async fn delete_uses_identity_filter() {
    let repo = repository(Recorder::new(Vec::new()), RepositoryOptions::default());
    repo.delete("Line", 10).await.expect("delete");
    assert_eq!(
        repo.backend().calls(),
        vec![Call::Delete("order_lines".into(), obj(json!({"id": 10})))]
    );
}

#[tokio::test]
async fn read_then_project_into_output_shape() {
    let repo = repository(Recorder::new(vec![("orders", stored_order())]), RepositoryOptions::default());
    let order = repo.find_by_id("Order", 1).await.expect("read").expect("found");

    let view = repo.context().mapper().map(&order, "Order", "OrderView").expect("map");
    assert_eq!(view.scalar("status"), Some(&json!("#open")));
    assert_eq!(view.scalar("id"), Some(&json!(1)));
    assert_eq!(
        view.get("lines").map(FieldValue::to_json),
        Some(json!([{"sku": "A", "qty": 1}, {"sku": "B", "qty": 2}]))
    );

    let err = repo.context().mapper().map(&order, "Order", "LineView").unwrap_err();
    assert!(matches!(err, relkit::MappingError::NotRegistered { .. }));
}
