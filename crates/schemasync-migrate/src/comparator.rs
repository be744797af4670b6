//! Schema diffing.
//!
//! [`compare_schemas`] is pure and deterministic: added columns come first,
//! then removed columns, then facet changes on shared columns, each group in
//! column-name order. Renames are never inferred; a renamed column shows up
//! as one removal plus one addition.

use serde_json::Value;

use crate::schema::{ColumnDefinition, Schema, SchemaChange, SchemaChangeKind};

const FLOAT_EPSILON: f64 = 1e-5;

/// Spellings of "the current timestamp" that databases treat as equivalent.
const TIMESTAMP_SYNONYMS: &[&str] = &["CURRENT_TIMESTAMP", "NOW()", "CURRENT_TIMESTAMP()"];

/// Compute the changes that turn `old` into `new`.
pub fn compare_schemas(old: &Schema, new: &Schema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for (name, definition) in new {
        if !old.contains_key(name) {
            changes.push(SchemaChange::added(name, definition));
        }
    }

    for (name, definition) in old {
        if !new.contains_key(name) {
            changes.push(SchemaChange::removed(name, definition));
        }
    }

    for (name, old_def) in old {
        let Some(new_def) = new.get(name) else {
            continue;
        };

        let a = normalize_definition(old_def);
        let b = normalize_definition(new_def);

        let facets = [
            (SchemaChangeKind::TypeChanged, type_differs(&a, &b)),
            (
                SchemaChangeKind::NullabilityChanged,
                a.nullable != b.nullable,
            ),
            (SchemaChangeKind::DefaultChanged, !defaults_equal(&a.default, &b.default)),
            (SchemaChangeKind::UniqueChanged, a.unique != b.unique),
        ];

        for (kind, differs) in facets {
            if differs {
                changes.push(SchemaChange::modified(kind, name, old_def, new_def));
            }
        }
    }

    changes
}

/// Whether the two definitions carry different defaults, treating
/// timestamp synonyms and near-equal floats as the same value.
pub fn has_default_changed(old: &ColumnDefinition, new: &ColumnDefinition) -> bool {
    !defaults_equal(&old.default, &new.default)
}

pub fn has_type_changed(old: &ColumnDefinition, new: &ColumnDefinition) -> bool {
    type_differs(&normalize_definition(old), &normalize_definition(new))
}

/// Map type aliases onto one canonical spelling.
pub fn normalize_type(column_type: &str) -> String {
    let upper = column_type.trim().to_uppercase();
    let canonical = match upper.as_str() {
        "" => "VARCHAR",
        "INT" => "INTEGER",
        "BOOL" => "BOOLEAN",
        "NUMERIC" => "DECIMAL",
        "REAL" => "FLOAT",
        "CHARACTER VARYING" => "VARCHAR",
        other => other,
    };
    canonical.to_string()
}

fn normalize_definition(definition: &ColumnDefinition) -> ColumnDefinition {
    let mut normalized = definition.clone();
    normalized.column_type = normalize_type(&definition.column_type);
    normalized
}

fn type_differs(a: &ColumnDefinition, b: &ColumnDefinition) -> bool {
    if a.column_type != b.column_type {
        return true;
    }
    match a.column_type.as_str() {
        "VARCHAR" | "CHAR" => a.length != b.length,
        "DECIMAL" => a.precision != b.precision || a.scale != b.scale,
        _ => false,
    }
}

/// Comparable form of a default value.
#[derive(Debug, PartialEq)]
enum DefaultRepr {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DefaultRepr {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => DefaultRepr::Null,
            Value::Bool(b) => DefaultRepr::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DefaultRepr::Integer(i),
                None => DefaultRepr::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return DefaultRepr::Integer(i);
                }
                if let Ok(f) = trimmed.parse::<f64>()
                    && f.is_finite()
                {
                    return DefaultRepr::Float(f);
                }
                let upper = trimmed.to_uppercase();
                if TIMESTAMP_SYNONYMS.contains(&upper.as_str()) {
                    DefaultRepr::Text(TIMESTAMP_SYNONYMS[0].to_string())
                } else {
                    DefaultRepr::Text(s.clone())
                }
            }
            other => DefaultRepr::Text(other.to_string()),
        }
    }
}

fn defaults_equal(a: &Value, b: &Value) -> bool {
    match (DefaultRepr::of(a), DefaultRepr::of(b)) {
        (DefaultRepr::Null, DefaultRepr::Null) => true,
        (DefaultRepr::Null, _) | (_, DefaultRepr::Null) => false,
        (DefaultRepr::Integer(x), DefaultRepr::Integer(y)) => x == y,
        (DefaultRepr::Integer(x), DefaultRepr::Float(y))
        | (DefaultRepr::Float(y), DefaultRepr::Integer(x)) => (x as f64 - y).abs() < FLOAT_EPSILON,
        (DefaultRepr::Float(x), DefaultRepr::Float(y)) => (x - y).abs() < FLOAT_EPSILON,
        (DefaultRepr::Text(x), DefaultRepr::Text(y)) => x == y,
        _ => false,
    }
}
