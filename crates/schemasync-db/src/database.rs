use std::collections::BTreeMap;

use schemasync_common::{Error, Result};
use serde_json::Value;

use crate::blueprint::{Blueprint, ColumnSpec};

/// A result row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Column metadata as reported by a driver's catalog.
///
/// `type_name` is the declared type verbatim (`VARCHAR(255)`, `decimal(8,2)`);
/// callers normalise it. `default` is the raw SQL default expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub autoincrement: bool,
    pub primary: bool,
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// Raw catalog statements for the lowest introspection tier.
///
/// The column query must return `SHOW COLUMNS`-shaped rows (`Field`, `Type`,
/// `Null`, `Key`, `Default`, `Extra`) or `PRAGMA table_info`-shaped rows
/// (`name`, `type`, `notnull`, `dflt_value`, `pk`). The index query must
/// return `SHOW INDEXES`-shaped rows (`Key_name`, `Column_name`,
/// `Non_unique`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQueries {
    pub columns: String,
    pub indexes: String,
}

/// Database and table-builder abstraction consumed by the migration engine.
///
/// Every call blocks until the database answers. Introspection tiers return
/// `Ok(None)` when the backend lacks the capability.
pub trait Database: Send + Sync {
    /// Short backend name for logs.
    fn driver_name(&self) -> &'static str;

    fn table_exists(&self, table: &str) -> Result<bool>;

    fn create_table(&self, blueprint: &Blueprint) -> Result<()>;

    fn drop_table_if_exists(&self, table: &str) -> Result<()>;

    fn add_column(&self, table: &str, column: &ColumnSpec) -> Result<()>;

    fn drop_column(&self, table: &str, column: &str) -> Result<()>;

    /// Add a single-column unique index to an existing column.
    fn add_unique_index(&self, table: &str, column: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} cannot add a unique index on {table}.{column}",
            self.driver_name()
        )))
    }

    /// Change an existing column to the full shape described by `column`.
    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<()>;

    /// Whether [`Database::modify_column`] can alter columns in place.
    fn supports_column_alteration(&self) -> bool;

    /// Execute a statement with positional `?` parameters; returns affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn max_identifier_length(&self) -> usize {
        64
    }

    /// Tier a: full per-column metadata in one call.
    fn column_metadata(&self, _table: &str) -> Result<Option<Vec<ColumnMetadata>>> {
        Ok(None)
    }

    /// Tier b: column names, in table order.
    fn column_listing(&self, _table: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    /// Tier b: metadata for a single column.
    fn column_detail(&self, _table: &str, _column: &str) -> Result<Option<ColumnMetadata>> {
        Ok(None)
    }

    /// Tier c: raw catalog statements for `table`.
    fn catalog_queries(&self, _table: &str) -> Option<CatalogQueries> {
        None
    }

    /// Indexes on `table`, for unique-constraint detection in tiers a and b.
    fn indexes(&self, _table: &str) -> Result<Option<Vec<IndexInfo>>> {
        Ok(None)
    }
}

/// Render a default value as a SQL literal.
///
/// `CURRENT_TIMESTAMP` and its synonyms are emitted bare; other strings are
/// single-quoted. Structured values are stored as their JSON text.
pub fn render_default(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) if is_current_timestamp(value) => "CURRENT_TIMESTAMP".to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

/// Whether `value` is `CURRENT_TIMESTAMP` or one of its synonyms.
pub fn is_current_timestamp(value: &Value) -> bool {
    value.as_str().is_some_and(|s| {
        matches!(
            s.trim().to_uppercase().as_str(),
            "CURRENT_TIMESTAMP" | "CURRENT_TIMESTAMP()" | "NOW()"
        )
    })
}

pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Split a declared type such as `varchar(255)` or `DECIMAL(8, 2) UNSIGNED`
/// into its uppercase base token and numeric arguments.
pub fn split_declared_type(declared: &str) -> (String, Vec<u32>) {
    let declared = declared.trim();
    let (head, args) = match (declared.find('('), declared.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let args = declared[open + 1..close]
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect();
            (&declared[..open], args)
        }
        _ => (declared, Vec::new()),
    };

    let base = head
        .split_whitespace()
        .filter(|w| !matches!(w.to_uppercase().as_str(), "UNSIGNED" | "SIGNED" | "ZEROFILL"))
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    (base, args)
}
