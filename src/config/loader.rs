//! Load config from JSON files and resolve it into the metadata registry and storage schema.

use crate::config::resolved::{default_field, ResolvedColumn, ResolvedModel, ResolvedRelation, StorageSchema};
use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use crate::metadata::MetadataRegistry;
use std::path::Path;

/// Register every configured class (call after validate).
pub fn register_classes(config: &FullConfig, metadata: &mut MetadataRegistry) {
    for class in &config.classes {
        if let Some(id) = &class.identity {
            metadata.set_identity_field(&class.name, id);
        }
        for p in &class.properties {
            metadata.register_property(&class.name, &p.name, &p.type_, p.kind, p.action);
        }
    }
}

/// Build the storage schema from full config.
pub fn resolve(config: &FullConfig) -> Result<StorageSchema, ConfigError> {
    validate(config)?;
    let mut schema = StorageSchema::default();
    for m in &config.models {
        let columns = m
            .columns
            .iter()
            .map(|c| ResolvedColumn {
                name: c.name.clone(),
                field: c.field.clone().unwrap_or_else(|| default_field(&c.name)),
                pg_type: c.pg_type.clone(),
                has_default: c.has_default,
                is_pk: c.name == m.primary_key,
            })
            .collect();
        let relations = m
            .relations
            .iter()
            .map(|r| ResolvedRelation {
                field: r.name.clone(),
                model: r.model.clone(),
                direction: r.direction,
                our_key: r.our_key.clone(),
                their_key: r.their_key.clone(),
            })
            .collect();
        schema.push(ResolvedModel {
            name: m.name.clone(),
            class: m.class.clone().unwrap_or_else(|| m.name.clone()),
            schema_name: m.schema.clone(),
            table_name: m.table.clone(),
            pk_column: m.primary_key.clone(),
            columns,
            relations,
        });
    }
    Ok(schema)
}

/// Read `classes.json` and `models.json` from `dir`. A missing `classes.json` means the
/// classes come from static tables instead.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let classes = match tokio::fs::read_to_string(dir.join("classes.json")).await {
        Ok(s) => serde_json::from_str(&s).map_err(|e| ConfigError::Load(format!("classes.json: {}", e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(ConfigError::Load(format!("classes.json: {}", e))),
    };
    let models_raw = tokio::fs::read_to_string(dir.join("models.json"))
        .await
        .map_err(|e| ConfigError::Load(format!("models.json: {}", e)))?;
    let models = serde_json::from_str(&models_raw).map_err(|e| ConfigError::Load(format!("models.json: {}", e)))?;
    tracing::debug!(dir = %dir.display(), "loaded config");
    Ok(FullConfig { classes, models })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationDirection;
    use crate::metadata::CompositionKind;

    fn config() -> FullConfig {
        serde_json::from_value(serde_json::json!({
            "classes": [
                {"name": "Order", "identity": "id", "properties": [
                    {"name": "id", "type": "uuid"},
                    {"name": "createdAt", "type": "string"},
                    {"name": "lines", "type": "Line", "kind": "collection", "action": "merge_add"}
                ]},
                {"name": "Line", "identity": "id", "properties": [{"name": "id", "type": "uuid"}]}
            ],
            "models": [
                {"name": "orders", "class": "Order", "table": "orders", "primary_key": "id",
                 "columns": [{"name": "id", "type": "uuid", "has_default": true}, {"name": "created_at"}],
                 "relations": [{"name": "lines", "model": "Line", "direction": "to_many",
                                "our_key": "id", "their_key": "order_id"}]},
                {"name": "Line", "table": "order_lines", "primary_key": "id",
                 "columns": [{"name": "id"}, {"name": "order_id", "field": "order"}]}
            ]
        }))
        .expect("config json")
    }

    #[test]
    fn resolves_fields_and_bindings() {
        let schema = resolve(&config()).expect("resolve");
        let orders = schema.model("orders").expect("orders");
        assert_eq!(orders.class, "Order");
        assert_eq!(orders.schema_name, "public");
        assert_eq!(orders.column_by_field("createdAt").map(|c| c.name.as_str()), Some("created_at"));
        assert_eq!(orders.pk_field(), "id");
        assert_eq!(orders.relation("lines").map(|r| r.direction), Some(RelationDirection::ToMany));

        let line = schema.model("Line").expect("line");
        assert_eq!(line.field_of("order_id"), "order");

        let bindings: Vec<_> = schema.bindings().collect();
        assert_eq!(bindings, [("Order", "orders"), ("Line", "Line")]);
    }

    #[test]
    fn registers_configured_classes() {
        let mut metadata = MetadataRegistry::new();
        register_classes(&config(), &mut metadata);
        let lines = metadata.descriptor("Order", "lines").expect("lines");
        assert_eq!(lines.composition, CompositionKind::Collection);
        assert_eq!(metadata.context("Order").and_then(|c| c.identity_field.as_deref()), Some("id"));
    }

    #[tokio::test]
    async fn missing_models_file_is_a_load_error() {
        let dir = std::env::temp_dir().join(format!("relkit-missing-{}", uuid::Uuid::new_v4()));
        let err = load_from_dir(&dir).await.unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
