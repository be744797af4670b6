//! Safe default and backfill values per column type, and lossless-where-possible
//! value casts between type families.

use chrono::Utc;
use schemasync_db::split_declared_type;
use serde_json::{Number, Value};
use tracing::warn;

use crate::schema::ColumnDefinition;

/// Broad classification of a normalised column type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    String,
    Date,
    DateTime,
    Time,
    Year,
    Timestamp,
    Boolean,
    Binary,
    Json,
    Enum,
    Unknown,
}

impl TypeFamily {
    /// Classify a type such as `varchar(255)` or `BIGINT`.
    pub fn of(column_type: &str) -> Self {
        let (base, _) = split_declared_type(column_type);
        match base.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL"
            | "BIGSERIAL" => TypeFamily::Integer,
            "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" | "DECIMAL" | "NUMERIC" => {
                TypeFamily::Float
            }
            "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "NVARCHAR" | "NCHAR"
            | "STRING" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "UUID" => {
                TypeFamily::String
            }
            "DATE" => TypeFamily::Date,
            "DATETIME" => TypeFamily::DateTime,
            "TIME" => TypeFamily::Time,
            "YEAR" => TypeFamily::Year,
            "TIMESTAMP" | "TIMESTAMPTZ" => TypeFamily::Timestamp,
            "BOOLEAN" | "BOOL" | "BIT" => TypeFamily::Boolean,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BYTEA" => {
                TypeFamily::Binary
            }
            "JSON" | "JSONB" => TypeFamily::Json,
            "ENUM" | "SET" => TypeFamily::Enum,
            _ => TypeFamily::Unknown,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, TypeFamily::Integer | TypeFamily::Float)
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            TypeFamily::Date
                | TypeFamily::DateTime
                | TypeFamily::Time
                | TypeFamily::Year
                | TypeFamily::Timestamp
        )
    }
}

/// A safe default for a column of `column_type`.
///
/// Unrecognised types yield `Value::Null` and a warning.
pub fn generate_default(column_type: &str, definition: &ColumnDefinition) -> Value {
    let now = Utc::now();
    match TypeFamily::of(column_type) {
        TypeFamily::Integer | TypeFamily::Boolean => Value::from(0),
        TypeFamily::Float => Value::from(0.0),
        TypeFamily::String => Value::String(String::new()),
        TypeFamily::Date => Value::String(now.format("%Y-%m-%d").to_string()),
        TypeFamily::DateTime => Value::String(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        TypeFamily::Time => Value::String(now.format("%H:%M:%S").to_string()),
        TypeFamily::Year => Value::String(now.format("%Y").to_string()),
        TypeFamily::Timestamp => Value::String("CURRENT_TIMESTAMP".to_string()),
        TypeFamily::Json => Value::String("{}".to_string()),
        TypeFamily::Binary | TypeFamily::Enum => Value::Null,
        TypeFamily::Unknown => {
            warn!(
                column = %definition.name,
                column_type,
                "no default known for column type"
            );
            Value::Null
        }
    }
}

/// A value suitable for backfilling existing rows when a NOT NULL column is
/// added without a declared default.
pub fn generate_non_null_value(column_type: &str, definition: &ColumnDefinition) -> Value {
    match TypeFamily::of(column_type) {
        TypeFamily::Enum => Value::String(
            definition
                .allowed
                .as_ref()
                .and_then(|values| values.first().cloned())
                .unwrap_or_default(),
        ),
        TypeFamily::Binary => Value::String(String::new()),
        _ => generate_default(column_type, definition),
    }
}

/// Cast `value` from one column type to another.
///
/// Returns `None` when the value cannot be represented in the target type;
/// that is distinct from `Some(0)` or `Some("")`. Strings become booleans
/// through a closed vocabulary and anything outside it maps to false.
pub fn safe_cast_value(value: &Value, from_type: &str, to_type: &str) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    let from = TypeFamily::of(from_type);
    let to = TypeFamily::of(to_type);

    match (from, to) {
        (a, TypeFamily::String) if a.is_numeric() => match value {
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::String(s) if parse_numeric(s).is_some() => Some(value.clone()),
            _ => None,
        },
        (TypeFamily::String | TypeFamily::Integer | TypeFamily::Float, TypeFamily::Integer) => {
            integer_of(value, from == TypeFamily::String).map(Value::from)
        }
        (TypeFamily::String | TypeFamily::Integer | TypeFamily::Float, TypeFamily::Float) => {
            Number::from_f64(numeric_of(value)?).map(Value::Number)
        }
        (TypeFamily::Boolean, TypeFamily::Boolean) => {
            Some(Value::from(i64::from(truthy(value)?)))
        }
        (TypeFamily::String, TypeFamily::Boolean) => {
            let s = value.as_str()?;
            Some(Value::from(i64::from(string_to_bool(s))))
        }
        (a, b) if a.is_temporal() && b.is_temporal() => Some(value.clone()),
        (TypeFamily::String, TypeFamily::String) => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        (a, b) if a == b && a != TypeFamily::Unknown => Some(value.clone()),
        _ => None,
    }
}

fn parse_numeric(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn numeric_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        _ => None,
    }
}

/// Exact integers are kept as is; fractional input goes through `f64` and
/// only truncates when `truncate` is set. Out-of-range values are `None`.
fn integer_of(value: &Value, truncate: bool) -> Option<i64> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if exact.is_some() {
        return exact;
    }
    if matches!(value, Value::Number(n) if n.is_u64()) {
        return None;
    }

    let n = numeric_of(value)?;
    if n.fract() != 0.0 && !truncate {
        return None;
    }
    let n = n.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if n < i64::MIN as f64 || n >= i64::MAX as f64 {
        return None;
    }
    Some(n as i64)
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => Some(string_to_bool(s)),
        _ => None,
    }
}

fn string_to_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "on"
    )
}
