//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from the resolved storage model.
//! Identifiers come from validated config only; values are always parameters.

use crate::config::{RelationDirection, ResolvedColumn, ResolvedModel, StorageSchema};
use crate::error::StorageError;
use crate::planner::IncludeDirective;
use crate::storage::{FindArgs, SortOrder};
use serde_json::{Map, Value};

const MAX_TAKE: u32 = 1000;

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> u32 {
        self.params.push(v);
        self.params.len() as u32
    }
}

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(model: &ResolvedModel) -> String {
    format!("{}.{}", quoted(&model.schema_name), quoted(&model.table_name))
}

fn placeholder(n: u32, col: &ResolvedColumn) -> String {
    match col.pg_type.as_deref() {
        Some(t) => format!("${}::{}", n, t),
        None => format!("${}", n),
    }
}

fn qualify(alias: Option<&str>, col: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, quoted(col)),
        None => quoted(col),
    }
}

/// One column exposed under its property name. Custom enums (schema.typename) and numeric
/// come back as text so row decoding sees a string.
fn column_expr(alias: Option<&str>, col: &ResolvedColumn) -> String {
    let expr = qualify(alias, &col.name);
    let pg_type = col.pg_type.as_deref().unwrap_or("");
    let expr = if pg_type.contains('.') || pg_type == "numeric" {
        format!("{}::text", expr)
    } else {
        expr
    };
    format!("{} AS {}", expr, quoted(&col.field))
}

fn select_list(model: &ResolvedModel, alias: Option<&str>) -> Vec<String> {
    model.columns.iter().map(|c| column_expr(alias, c)).collect()
}

fn column_for<'m>(model: &'m ResolvedModel, field: &str) -> Result<&'m ResolvedColumn, StorageError> {
    model
        .column_by_field(field)
        .ok_or_else(|| StorageError::InvalidArgument(format!("{} has no field '{}'", model.name, field)))
}

/// Scalar subqueries for each included relation: `row_to_json` for to-one, `json_agg` for
/// to-many. Nested directives recurse with a fresh alias per level.
fn include_columns(
    schema: &StorageSchema,
    model: &ResolvedModel,
    alias: &str,
    include: &IncludeDirective,
    depth: usize,
) -> Result<Vec<String>, StorageError> {
    let mut out = Vec::new();
    for (name, directive) in include.relations() {
        let rel = model
            .relation(name)
            .ok_or_else(|| StorageError::InvalidArgument(format!("{} has no relation '{}'", model.name, name)))?;
        let related = schema
            .model(&rel.model)
            .ok_or_else(|| StorageError::UnknownModel(rel.model.clone()))?;
        let sub_alias = format!("t{}", depth + 1);
        let mut cols = select_list(related, Some(&sub_alias));
        if let IncludeDirective::Nested(_) = directive {
            cols.extend(include_columns(schema, related, &sub_alias, directive, depth + 1)?);
        }
        let sub_from = format!(
            "{} {} WHERE {} = {}",
            qualified_table(related),
            sub_alias,
            qualify(Some(&sub_alias), &rel.their_key),
            qualify(Some(alias), &rel.our_key)
        );
        let subquery = match rel.direction {
            RelationDirection::ToOne => format!(
                "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
                cols.join(", "),
                sub_from
            ),
            RelationDirection::ToMany => format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} ORDER BY {}) sub)",
                cols.join(", "),
                sub_from,
                qualify(Some(&sub_alias), &related.pk_column)
            ),
        };
        out.push(format!("{} AS {}", subquery, quoted(name)));
    }
    Ok(out)
}

fn where_clause(
    q: &mut QueryBuf,
    model: &ResolvedModel,
    alias: Option<&str>,
    filter: &Map<String, Value>,
) -> Result<String, StorageError> {
    let mut parts = Vec::new();
    for (field, val) in filter {
        let col = column_for(model, field)?;
        if val.is_null() {
            parts.push(format!("{} IS NULL", qualify(alias, &col.name)));
        } else {
            let n = q.push_param(val.clone());
            parts.push(format!("{} = {}", qualify(alias, &col.name), placeholder(n, col)));
        }
    }
    Ok(if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    })
}

fn require_filter(model: &ResolvedModel, filter: &Map<String, Value>) -> Result<(), StorageError> {
    if filter.is_empty() {
        return Err(StorageError::InvalidArgument(format!(
            "refusing unfiltered write on {}",
            model.name
        )));
    }
    Ok(())
}

/// SELECT with filters, ordering (default: primary key), pagination and includes.
pub fn select(schema: &StorageSchema, model: &ResolvedModel, args: &FindArgs) -> Result<QueryBuf, StorageError> {
    const ROOT: &str = "t0";
    let mut q = QueryBuf::new();
    let mut parts = select_list(model, Some(ROOT));
    if let Some(include) = &args.include {
        parts.extend(include_columns(schema, model, ROOT, include, 0)?);
    }
    let where_sql = where_clause(&mut q, model, Some(ROOT), &args.filter)?;

    let mut order = Vec::new();
    for o in &args.order_by {
        let col = column_for(model, &o.field)?;
        let dir = match o.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        order.push(format!("{} {}", qualify(Some(ROOT), &col.name), dir));
    }
    if order.is_empty() {
        order.push(qualify(Some(ROOT), &model.pk_column));
    }
    let limit_clause = args.take.map(|n| format!(" LIMIT {}", n.min(MAX_TAKE))).unwrap_or_default();
    let offset_clause = args.skip.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}{}{}",
        parts.join(", "),
        qualified_table(model),
        ROOT,
        where_sql,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    Ok(q)
}

pub fn count(model: &ResolvedModel, filter: &Map<String, Value>) -> Result<QueryBuf, StorageError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, model, None, filter)?;
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}{}", qualified_table(model), where_sql);
    Ok(q)
}

/// INSERT of the given fields only; omitted columns take their DB default (or NULL).
pub fn insert(model: &ResolvedModel, values: &Map<String, Value>) -> Result<QueryBuf, StorageError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (field, val) in values {
        let col = column_for(model, field)?;
        if val.is_null() && col.has_default {
            continue;
        }
        let n = q.push_param(val.clone());
        cols.push(quoted(&col.name));
        placeholders.push(placeholder(n, col));
    }
    let returning = select_list(model, None).join(", ");
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", qualified_table(model), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(model),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE rows matching `filter`: SET only the given fields (never the primary key).
/// With nothing to set, selects the matching row instead.
pub fn update(
    model: &ResolvedModel,
    filter: &Map<String, Value>,
    values: &Map<String, Value>,
) -> Result<QueryBuf, StorageError> {
    require_filter(model, filter)?;
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (field, val) in values {
        let col = column_for(model, field)?;
        if col.is_pk {
            continue;
        }
        let n = q.push_param(val.clone());
        sets.push(format!("{} = {}", quoted(&col.name), placeholder(n, col)));
    }
    let returning = select_list(model, None).join(", ");
    let where_sql = where_clause(&mut q, model, None, filter)?;
    q.sql = if sets.is_empty() {
        format!("SELECT {} FROM {}{}", returning, qualified_table(model), where_sql)
    } else {
        format!(
            "UPDATE {} SET {}{} RETURNING {}",
            qualified_table(model),
            sets.join(", "),
            where_sql,
            returning
        )
    };
    Ok(q)
}

pub fn delete(model: &ResolvedModel, filter: &Map<String, Value>) -> Result<QueryBuf, StorageError> {
    require_filter(model, filter)?;
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, model, None, filter)?;
    let returning = select_list(model, None).join(", ");
    q.sql = format!("DELETE FROM {}{} RETURNING {}", qualified_table(model), where_sql, returning);
    Ok(q)
}
