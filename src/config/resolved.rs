//! Resolved storage model: config validated and flattened for query building.

use crate::case::to_camel_case;
use crate::config::RelationDirection;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct ResolvedColumn {
    pub name: String,
    /// Property name the column is exposed as.
    pub field: String,
    /// PostgreSQL type name for SQL casts (e.g. "timestamptz") when binding string values.
    pub pg_type: Option<String>,
    pub has_default: bool,
    pub is_pk: bool,
}

#[derive(Clone, Debug)]
pub struct ResolvedRelation {
    pub field: String,
    pub model: String,
    pub direction: RelationDirection,
    pub our_key: String,
    pub their_key: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub name: String,
    pub class: String,
    pub schema_name: String,
    pub table_name: String,
    pub pk_column: String,
    pub columns: Vec<ResolvedColumn>,
    pub relations: Vec<ResolvedRelation>,
}

impl ResolvedModel {
    pub fn column_by_field(&self, field: &str) -> Option<&ResolvedColumn> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn column(&self, name: &str) -> Option<&ResolvedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Property name of a column; falls back to the column name.
    pub fn field_of<'a>(&'a self, column: &'a str) -> &'a str {
        self.column(column).map(|c| c.field.as_str()).unwrap_or(column)
    }

    pub fn pk_field(&self) -> &str {
        self.field_of(&self.pk_column)
    }

    pub fn relation(&self, field: &str) -> Option<&ResolvedRelation> {
        self.relations.iter().find(|r| r.field == field)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StorageSchema {
    pub models: Vec<ResolvedModel>,
    pub model_by_name: HashMap<String, usize>,
}

impl StorageSchema {
    pub fn model(&self, name: &str) -> Option<&ResolvedModel> {
        self.model_by_name.get(name).map(|&i| &self.models[i])
    }

    /// (class, model) pairs, for binding a repository.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.models.iter().map(|m| (m.class.as_str(), m.name.as_str()))
    }

    pub(crate) fn push(&mut self, model: ResolvedModel) {
        self.model_by_name.insert(model.name.clone(), self.models.len());
        self.models.push(model);
    }
}

pub(crate) fn default_field(column: &str) -> String {
    to_camel_case(column)
}
