//! Decode PostgreSQL rows into JSON objects keyed by property name.

use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

pub(crate) fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), cell_to_value(row, i, col.type_info().name()));
    }
    Value::Object(map)
}

fn float(n: Option<f64>) -> Value {
    n.and_then(Number::from_f64).map(Value::Number).unwrap_or(Value::Null)
}

/// Decode by declared column type. Include subqueries arrive as `json`; enums and numeric
/// are cast to text by the query builder.
fn cell_to_value(row: &PgRow, i: usize, type_name: &str) -> Value {
    let decoded: Result<Value, sqlx::Error> = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(i).map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "INT4" => row.try_get::<Option<i32>, _>(i).map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "INT8" => row.try_get::<Option<i64>, _>(i).map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        "FLOAT4" => row.try_get::<Option<f32>, _>(i).map(|v| float(v.map(f64::from))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(float),
        "BOOL" => row.try_get::<Option<bool>, _>(i).map(|v| v.map(Value::Bool).unwrap_or(Value::Null)),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(i)
            .map(|v| v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
            .map(|v| v.map(|d| Value::String(d.to_rfc3339())).unwrap_or(Value::Null)),
        "TIMESTAMP" => row.try_get::<Option<chrono::NaiveDateTime>, _>(i).map(|v| {
            v.map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null)
        }),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(i)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%d").to_string())).unwrap_or(Value::Null)),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i).map(|v| v.unwrap_or(Value::Null)),
        _ => row
            .try_get::<Option<String>, _>(i)
            .map(|v| v.map(Value::String).unwrap_or(Value::Null)),
    };
    match decoded {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(column = i, pg_type = type_name, error = %e, "undecodable column, using null");
            Value::Null
        }
    }
}
