//! Column definitions, schemas and the change records produced by diffing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A table's shape, keyed by column name.
///
/// An empty schema returned by extraction means "extraction failed", never
/// "table without columns".
pub type Schema = BTreeMap<String, ColumnDefinition>;

/// The normalised shape of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    #[serde(default)]
    pub name: String,
    /// Normalised uppercase type token, e.g. `VARCHAR`.
    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub autoincrement: bool,
    #[serde(default)]
    pub primary: bool,
    /// Allowed values of ENUM/SET columns, when the driver reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

fn default_column_type() -> String {
    "VARCHAR".to_string()
}

impl Default for ColumnDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            column_type: default_column_type(),
            nullable: false,
            default: Value::Null,
            unique: false,
            length: None,
            precision: None,
            scale: None,
            autoincrement: false,
            primary: false,
            allowed: None,
        }
    }
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into().trim().to_uppercase(),
            ..Default::default()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Type with its size arguments, e.g. `VARCHAR(255)` or `DECIMAL(8,2)`.
    pub fn type_display(&self) -> String {
        match (self.precision, self.scale, self.length) {
            (Some(p), Some(s), _) => format!("{}({p},{s})", self.column_type),
            (Some(p), None, _) => format!("{}({p})", self.column_type),
            (None, _, Some(len)) => format!("{}({len})", self.column_type),
            _ => self.column_type.clone(),
        }
    }
}

/// Which facet of a column a [`SchemaChange`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaChangeKind {
    ColumnAdded,
    ColumnRemoved,
    TypeChanged,
    NullabilityChanged,
    DefaultChanged,
    UniqueChanged,
}

/// One structural difference between two schemas.
///
/// Facet changes carry the complete old and new definitions of the column,
/// so any one of them describes the full target shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub kind: SchemaChangeKind,
    pub column_name: String,
    pub old_definition: Option<ColumnDefinition>,
    pub new_definition: Option<ColumnDefinition>,
}

impl SchemaChange {
    pub fn added(name: &str, definition: &ColumnDefinition) -> Self {
        Self {
            kind: SchemaChangeKind::ColumnAdded,
            column_name: name.to_string(),
            old_definition: None,
            new_definition: Some(definition.clone()),
        }
    }

    pub fn removed(name: &str, definition: &ColumnDefinition) -> Self {
        Self {
            kind: SchemaChangeKind::ColumnRemoved,
            column_name: name.to_string(),
            old_definition: Some(definition.clone()),
            new_definition: None,
        }
    }

    pub fn modified(
        kind: SchemaChangeKind,
        name: &str,
        old: &ColumnDefinition,
        new: &ColumnDefinition,
    ) -> Self {
        Self {
            kind,
            column_name: name.to_string(),
            old_definition: Some(old.clone()),
            new_definition: Some(new.clone()),
        }
    }
}

fn describe_default(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => format!("'{s}'"),
        Some(other) => other.to_string(),
    }
}

fn describe_nullable(definition: Option<&ColumnDefinition>) -> &'static str {
    match definition {
        Some(d) if d.nullable => "NULL",
        _ => "NOT NULL",
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self.old_definition.as_ref();
        let new = self.new_definition.as_ref();
        let name = &self.column_name;

        match self.kind {
            SchemaChangeKind::ColumnAdded => write!(
                f,
                "Column '{name}' added as {}",
                new.map(ColumnDefinition::type_display).unwrap_or_default()
            ),
            SchemaChangeKind::ColumnRemoved => write!(f, "Column '{name}' removed"),
            SchemaChangeKind::TypeChanged => write!(
                f,
                "Column '{name}' type changed from {} to {}",
                old.map(ColumnDefinition::type_display).unwrap_or_default(),
                new.map(ColumnDefinition::type_display).unwrap_or_default()
            ),
            SchemaChangeKind::NullabilityChanged => write!(
                f,
                "Column '{name}' nullability changed from {} to {}",
                describe_nullable(old),
                describe_nullable(new)
            ),
            SchemaChangeKind::DefaultChanged => write!(
                f,
                "Column '{name}' default changed from {} to {}",
                describe_default(old.map(|d| &d.default)),
                describe_default(new.map(|d| &d.default))
            ),
            SchemaChangeKind::UniqueChanged => {
                if new.is_some_and(|d| d.unique) {
                    write!(f, "Column '{name}' unique constraint added")
                } else {
                    write!(f, "Column '{name}' unique constraint removed")
                }
            }
        }
    }
}
