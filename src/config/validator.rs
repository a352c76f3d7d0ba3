//! Config validation: identifier syntax, uniqueness and referential integrity.

use crate::config::{FullConfig, ModelConfig, StorageSchema};
use crate::error::ConfigError;
use crate::metadata::{CompositionKind, MetadataRegistry};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const IDENTIFIER: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";
/// Cast types may be schema-qualified or multi-word ("timestamp with time zone").
const PG_TYPE: &str = r"^[A-Za-z_][A-Za-z0-9_ .\[\]]*$";

fn check_identifier(re: &Regex, s: &str) -> Result<(), ConfigError> {
    if re.is_match(s) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(s.to_string()))
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let re = Regex::new(IDENTIFIER).map_err(|e| ConfigError::Validation(e.to_string()))?;
    let pg_type_re = Regex::new(PG_TYPE).map_err(|e| ConfigError::Validation(e.to_string()))?;

    let mut class_names = HashSet::new();
    for class in &config.classes {
        check_identifier(&re, &class.name)?;
        if !class_names.insert(class.name.as_str()) {
            return Err(ConfigError::Duplicate {
                kind: "class",
                id: class.name.clone(),
            });
        }
    }

    for class in &config.classes {
        let mut props = HashSet::new();
        for p in &class.properties {
            check_identifier(&re, &p.name)?;
            if !props.insert(p.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "property",
                    id: format!("{}.{}", class.name, p.name),
                });
            }
            if p.kind != CompositionKind::None && !class_names.contains(p.type_.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "class",
                    id: p.type_.clone(),
                });
            }
        }
        if let Some(id) = &class.identity {
            if !props.contains(id.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "identity property",
                    id: format!("{}.{}", class.name, id),
                });
            }
        }
    }

    let mut models: HashMap<&str, &ModelConfig> = HashMap::new();
    for m in &config.models {
        check_identifier(&re, &m.name)?;
        check_identifier(&re, &m.schema)?;
        check_identifier(&re, &m.table)?;
        if models.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::Duplicate {
                kind: "model",
                id: m.name.clone(),
            });
        }
    }

    for m in &config.models {
        let columns: HashSet<&str> = m.columns.iter().map(|c| c.name.as_str()).collect();
        if columns.len() != m.columns.len() {
            return Err(ConfigError::Duplicate {
                kind: "column",
                id: m.name.clone(),
            });
        }
        for c in &m.columns {
            check_identifier(&re, &c.name)?;
            if let Some(field) = &c.field {
                check_identifier(&re, field)?;
            }
            if let Some(t) = &c.pg_type {
                check_identifier(&pg_type_re, t)?;
            }
        }
        if !columns.contains(m.primary_key.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "primary key column",
                id: format!("{}.{}", m.name, m.primary_key),
            });
        }
        for rel in &m.relations {
            let related = models.get(rel.model.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: rel.model.clone(),
            })?;
            if !columns.contains(rel.our_key.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", m.name, rel.our_key),
                });
            }
            if !related.columns.iter().any(|c| c.name == rel.their_key) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", related.name, rel.their_key),
                });
            }
        }
    }

    Ok(())
}

/// Cross-check class metadata against a resolved storage schema: every bound class must be
/// registered, and each of its relation properties needs a storage relation of the same name
/// that points at a model bound to the declared class. Reads plan an include for every
/// relation property, so a gap here would fail every read of the class.
pub fn validate_bindings(metadata: &MetadataRegistry, schema: &StorageSchema) -> Result<(), ConfigError> {
    for model in &schema.models {
        let ctx = metadata.context(&model.class).ok_or_else(|| ConfigError::MissingReference {
            kind: "class",
            id: model.class.clone(),
        })?;
        for prop in ctx.relations() {
            let rel = model.relation(&prop.name).ok_or_else(|| ConfigError::MissingReference {
                kind: "relation",
                id: format!("{}.{}", model.name, prop.name),
            })?;
            let related = schema.model(&rel.model).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: rel.model.clone(),
            })?;
            let expected = metadata
                .class_by_type_name(&prop.declared_type)
                .map(|c| c.class.as_str())
                .unwrap_or(prop.declared_type.as_str());
            if related.class != expected {
                return Err(ConfigError::Validation(format!(
                    "{}.{} stores {} but {}.{} holds {}",
                    model.name, rel.field, related.class, ctx.class, prop.name, expected
                )));
            }
        }
    }
    Ok(())
}
