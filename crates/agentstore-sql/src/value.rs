//! Parameter binding and row decoding shared by all three backends.

use serde_json::{Map, Number, Value};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use tracing::warn;

use agentstore_core::Row;

/// One bound query parameter, backend-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// pgvector embedding; only bindable on Postgres.
    Vector(Vec<f32>),
}

impl SqlParam {
    /// Lower a JSON attribute value to a bindable parameter. Nested
    /// structured values are stored as their JSON encoding.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

fn number(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

macro_rules! take {
    ($row:expr, $i:expr, $ty:ty) => {
        $row.try_get::<Option<$ty>, _>($i).ok().flatten()
    };
}

pub fn pg_row_to_json(row: &PgRow) -> Row {
    let mut out = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let ty = col.type_info().name().to_uppercase();
        let value = match ty.as_str() {
            "BOOL" => take!(row, i, bool).map(Value::Bool),
            "INT2" => take!(row, i, i16).map(|v| Value::from(v as i64)),
            "INT4" => take!(row, i, i32).map(|v| Value::from(v as i64)),
            "INT8" => take!(row, i, i64).map(Value::from),
            "FLOAT4" => take!(row, i, f32).map(|v| number(v as f64)),
            "FLOAT8" => take!(row, i, f64).map(number),
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
                take!(row, i, String).map(Value::String)
            }
            "UUID" => take!(row, i, uuid::Uuid).map(|v| Value::String(v.to_string())),
            "JSON" | "JSONB" => take!(row, i, Value),
            "TIMESTAMPTZ" => {
                take!(row, i, chrono::DateTime<chrono::Utc>).map(|v| Value::String(v.to_rfc3339()))
            }
            "TIMESTAMP" => {
                take!(row, i, chrono::NaiveDateTime).map(|v| Value::String(v.to_string()))
            }
            "DATE" => take!(row, i, chrono::NaiveDate).map(|v| Value::String(v.to_string())),
            other => {
                warn!(column = %name, ty = %other, "unhandled postgres column type");
                None
            }
        };
        out.insert(name, value.unwrap_or(Value::Null));
    }
    out
}

pub fn sqlite_row_to_json(row: &SqliteRow) -> Row {
    let mut out = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let ty = col.type_info().name().to_uppercase();
        let value = match ty.as_str() {
            "BOOLEAN" | "BOOL" => take!(row, i, bool).map(Value::Bool),
            "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => {
                take!(row, i, i64).map(Value::from)
            }
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => take!(row, i, f64).map(number),
            "TEXT" | "VARCHAR" | "CHAR" | "DATETIME" | "DATE" => {
                take!(row, i, String).map(Value::String)
            }
            "BLOB" => None,
            // dynamic typing: probe the common decodes in order
            _ => take!(row, i, i64)
                .map(Value::from)
                .or_else(|| take!(row, i, f64).map(number))
                .or_else(|| take!(row, i, String).map(Value::String)),
        };
        out.insert(name, value.unwrap_or(Value::Null));
    }
    out
}

pub fn mysql_row_to_json(row: &MySqlRow) -> Row {
    let mut out = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let ty = col.type_info().name().to_uppercase();
        let value = match ty.as_str() {
            "BOOLEAN" => take!(row, i, bool).map(Value::Bool),
            "TINYINT" => take!(row, i, bool)
                .map(Value::Bool)
                .or_else(|| take!(row, i, i8).map(|v| Value::from(v as i64))),
            "SMALLINT" => take!(row, i, i16).map(|v| Value::from(v as i64)),
            "INT" | "MEDIUMINT" => take!(row, i, i32).map(|v| Value::from(v as i64)),
            "BIGINT" => take!(row, i, i64).map(Value::from),
            "FLOAT" => take!(row, i, f32).map(|v| number(v as f64)),
            "DOUBLE" => take!(row, i, f64).map(number),
            "VARCHAR" | "TEXT" | "CHAR" | "ENUM" | "LONGTEXT" | "MEDIUMTEXT" | "TINYTEXT" => {
                take!(row, i, String).map(Value::String)
            }
            "JSON" => take!(row, i, Value),
            "TIMESTAMP" => {
                take!(row, i, chrono::DateTime<chrono::Utc>).map(|v| Value::String(v.to_rfc3339()))
            }
            "DATETIME" => {
                take!(row, i, chrono::NaiveDateTime).map(|v| Value::String(v.to_string()))
            }
            "DATE" => take!(row, i, chrono::NaiveDate).map(|v| Value::String(v.to_string())),
            other => {
                warn!(column = %name, ty = %other, "unhandled mysql column type");
                None
            }
        };
        out.insert(name, value.unwrap_or(Value::Null));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_lower_to_params() {
        assert_eq!(SqlParam::from_json(&json!(null)), SqlParam::Null);
        assert_eq!(SqlParam::from_json(&json!(true)), SqlParam::Bool(true));
        assert_eq!(SqlParam::from_json(&json!(42)), SqlParam::Int(42));
        assert_eq!(SqlParam::from_json(&json!(1.5)), SqlParam::Float(1.5));
        assert_eq!(
            SqlParam::from_json(&json!("joe")),
            SqlParam::Text("joe".into())
        );
        assert_eq!(
            SqlParam::from_json(&json!({"a": 1})),
            SqlParam::Text("{\"a\":1}".into())
        );
    }
}
