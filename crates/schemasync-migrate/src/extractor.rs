//! Learns a model's intended schema by materialising it as a throwaway table
//! and reading back what the driver actually created.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use schemasync_common::{Error, Result};
use schemasync_config::MigratorConfig;
use schemasync_db::{ColumnMetadata, Database, IndexInfo, Row, split_declared_type};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::defaults::safe_cast_value;
use crate::model::{Model, blueprint_for};
use crate::registry::TempTableRegistry;
use crate::schema::{ColumnDefinition, Schema};

const SHORT_NAME_LEN: usize = 12;
const HASH_LEN: usize = 16;

pub struct SchemaExtractor {
    db: Arc<dyn Database>,
    registry: Arc<TempTableRegistry>,
    temp_prefix: String,
    max_attempts: u32,
    identifier_limit: usize,
}

impl SchemaExtractor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::from_config(db, &MigratorConfig::default())
    }

    pub fn from_config(db: Arc<dyn Database>, config: &MigratorConfig) -> Self {
        let identifier_limit = config.identifier_limit.min(db.max_identifier_length());
        Self {
            db,
            registry: Arc::new(TempTableRegistry::new()),
            temp_prefix: config.temp_table_prefix.clone(),
            max_attempts: config.max_extract_attempts.max(1),
            identifier_limit,
        }
    }

    /// Use `registry` to track temp tables instead of a private one.
    pub fn with_registry(mut self, registry: Arc<TempTableRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &TempTableRegistry {
        &self.registry
    }

    /// The schema `model` materialises to on this database.
    ///
    /// An empty schema means extraction failed; the cause has been logged.
    pub fn extract_from_model(&self, model: &dyn Model) -> Schema {
        let identity = model.identity();

        for attempt in 1..=self.max_attempts {
            let temp = self.temp_table_name(model);
            let result = self.extract_once(model, &temp);
            self.cleanup(&temp);

            match result {
                Ok(schema) => {
                    debug!(model = %identity, temp = %temp, columns = schema.len(), "extracted schema");
                    return schema;
                }
                Err(e) if e.is_duplicate_table() && attempt < self.max_attempts => {
                    debug!(model = %identity, temp = %temp, attempt, "temp table name taken, retrying");
                }
                Err(e) => {
                    error!(model = %identity, attempt, "schema extraction failed: {e}");
                    break;
                }
            }
        }

        Schema::new()
    }

    /// Read the schema of an existing table through the introspection tiers.
    pub fn extract_from_table(&self, table: &str) -> Result<Schema> {
        let schema = self.read_schema(table)?;
        if schema.is_empty() {
            return Err(Error::Extraction(format!("no columns reported for {table}")));
        }
        Ok(schema)
    }

    fn extract_once(&self, model: &dyn Model, temp: &str) -> Result<Schema> {
        self.db.drop_table_if_exists(temp)?;
        self.registry.register(temp);
        self.db.create_table(&blueprint_for(model, temp))?;
        self.extract_from_table(temp)
    }

    fn cleanup(&self, temp: &str) {
        match self.db.drop_table_if_exists(temp) {
            Ok(()) => self.registry.release(temp),
            Err(e) => warn!(temp, "failed to drop temp table, left for sweep: {e}"),
        }
    }

    /// Short, collision-resistant temp table name below the identifier limit.
    pub fn temp_table_name(&self, model: &dyn Model) -> String {
        let short: String = model
            .short_name()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(SHORT_NAME_LEN)
            .collect::<String>()
            .to_lowercase();

        let seed = format!(
            "{}:{}:{}:{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            std::process::id(),
            rand::random::<u64>(),
            self.registry.next_sequence()
        );
        let digest = hex::encode(Sha256::digest(seed.as_bytes()));
        let hash = &digest[..HASH_LEN];

        let name = if short.is_empty() {
            format!("{}{hash}", self.temp_prefix)
        } else {
            format!("{}{short}_{hash}", self.temp_prefix)
        };
        if name.len() < self.identifier_limit {
            return name;
        }

        let hashed = format!("{}{hash}", self.temp_prefix);
        if hashed.len() < self.identifier_limit {
            return hashed;
        }
        let room = self.identifier_limit.saturating_sub(2).clamp(1, digest.len());
        format!("t{}", &digest[..room])
    }

    fn read_schema(&self, table: &str) -> Result<Schema> {
        let mut last_error = None;

        match self.read_column_metadata(table) {
            Ok(Some(schema)) => return Ok(schema),
            Ok(None) => {}
            Err(e) => {
                warn!(table, "column metadata tier failed: {e}");
                last_error = Some(e);
            }
        }

        match self.read_column_listing(table) {
            Ok(Some(schema)) => return Ok(schema),
            Ok(None) => {}
            Err(e) => {
                warn!(table, "column listing tier failed: {e}");
                last_error = Some(e);
            }
        }

        match self.read_catalog(table) {
            Ok(Some(schema)) => return Ok(schema),
            Ok(None) => {}
            Err(e) => {
                warn!(table, "catalog tier failed: {e}");
                last_error = Some(e);
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Extraction(format!(
                "{} driver offers no way to introspect {table}",
                self.db.driver_name()
            ))
        }))
    }

    fn read_column_metadata(&self, table: &str) -> Result<Option<Schema>> {
        let Some(columns) = self.db.column_metadata(table)? else {
            return Ok(None);
        };
        let unique = self.unique_columns(table);
        Ok(Some(build_schema(&columns, &unique)))
    }

    fn read_column_listing(&self, table: &str) -> Result<Option<Schema>> {
        let Some(names) = self.db.column_listing(table)? else {
            return Ok(None);
        };

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            match self.db.column_detail(table, &name)? {
                Some(meta) => columns.push(meta),
                None => {
                    debug!(table, column = %name, "no column detail, assuming defaults");
                    columns.push(ColumnMetadata {
                        name,
                        ..Default::default()
                    });
                }
            }
        }

        let unique = self.unique_columns(table);
        Ok(Some(build_schema(&columns, &unique)))
    }

    fn read_catalog(&self, table: &str) -> Result<Option<Schema>> {
        let Some(queries) = self.db.catalog_queries(table) else {
            return Ok(None);
        };

        let columns: Vec<ColumnMetadata> = self
            .db
            .query(&queries.columns, &[])?
            .iter()
            .filter_map(metadata_from_catalog_row)
            .collect();

        let unique = match self.db.query(&queries.indexes, &[]) {
            Ok(rows) => unique_from_indexes(&indexes_from_catalog_rows(&rows)),
            Err(e) => {
                warn!(table, "index catalog query failed: {e}");
                BTreeSet::new()
            }
        };

        Ok(Some(build_schema(&columns, &unique)))
    }

    fn unique_columns(&self, table: &str) -> BTreeSet<String> {
        match self.db.indexes(table) {
            Ok(Some(indexes)) => unique_from_indexes(&indexes),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                warn!(table, "index listing failed: {e}");
                BTreeSet::new()
            }
        }
    }
}

impl Drop for SchemaExtractor {
    fn drop(&mut self) {
        let swept = self.registry.sweep(self.db.as_ref());
        if swept > 0 {
            warn!(swept, "dropped temp tables left behind by extraction");
        }
    }
}

/// Columns covered by a single-column, non-primary unique index.
fn unique_from_indexes(indexes: &[IndexInfo]) -> BTreeSet<String> {
    indexes
        .iter()
        .filter(|idx| idx.unique && !idx.primary && idx.columns.len() == 1)
        .flat_map(|idx| idx.columns.iter().cloned())
        .collect()
}

fn build_schema(columns: &[ColumnMetadata], unique: &BTreeSet<String>) -> Schema {
    columns
        .iter()
        .filter(|meta| !meta.name.is_empty())
        .map(|meta| {
            let mut definition = definition_from_metadata(meta);
            definition.unique = unique.contains(&meta.name);
            (meta.name.clone(), definition)
        })
        .collect()
}

fn definition_from_metadata(meta: &ColumnMetadata) -> ColumnDefinition {
    let (base, args) = split_declared_type(&meta.type_name);
    let column_type = if base.is_empty() {
        "VARCHAR".to_string()
    } else {
        base
    };
    let (length, precision, scale) = type_sizes(&column_type, &args);

    ColumnDefinition {
        name: meta.name.clone(),
        default: normalize_default(meta.default.as_deref(), &column_type),
        allowed: enum_values(&column_type, &meta.type_name),
        column_type,
        nullable: meta.nullable,
        unique: false,
        length: meta.length.or(length),
        precision: meta.precision.or(precision),
        scale: meta.scale.or(scale),
        autoincrement: meta.autoincrement,
        primary: meta.primary,
    }
}

fn type_sizes(base: &str, args: &[u32]) -> (Option<u32>, Option<u32>, Option<u32>) {
    match base {
        "DECIMAL" | "NUMERIC" => (None, args.first().copied(), args.get(1).copied()),
        _ => (args.first().copied(), None, None),
    }
}

/// Values of an `enum('a','b')` or `set(...)` declaration.
fn enum_values(base: &str, declared: &str) -> Option<Vec<String>> {
    if !matches!(base, "ENUM" | "SET") {
        return None;
    }
    let open = declared.find('(')?;
    let close = declared.rfind(')')?;
    if close <= open {
        return None;
    }
    Some(
        declared[open + 1..close]
            .split(',')
            .map(|v| unquote(v.trim()).0.to_string())
            .collect(),
    )
}

/// Strip one layer of matching quotes. The flag tells whether any were removed.
fn unquote(raw: &str) -> (&str, bool) {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return (&raw[1..raw.len() - 1], true);
        }
    }
    (raw, false)
}

/// Turn a raw catalog default expression into a typed value.
fn normalize_default(raw: Option<&str>, column_type: &str) -> Value {
    let Some(mut raw) = raw.map(str::trim) else {
        return Value::Null;
    };
    while raw.len() >= 2 && raw.starts_with('(') && raw.ends_with(')') {
        raw = raw[1..raw.len() - 1].trim();
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }

    let (text, quoted) = unquote(raw);
    let text = if quoted {
        text.replace("''", "'")
    } else {
        text.to_string()
    };
    if !quoted
        && matches!(
            text.to_uppercase().as_str(),
            "CURRENT_TIMESTAMP" | "CURRENT_TIMESTAMP()" | "NOW()"
        )
    {
        return Value::String(text.to_uppercase());
    }

    let value = Value::String(text);
    safe_cast_value(&value, "VARCHAR", column_type).unwrap_or(value)
}

/// Normalise a `SHOW COLUMNS` or `PRAGMA table_info` row.
fn metadata_from_catalog_row(row: &Row) -> Option<ColumnMetadata> {
    let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    let flag = |key: &str| match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0) != 0,
        _ => false,
    };

    let (name, type_name, nullable, default, primary, autoincrement) =
        if let Some(field) = text("Field") {
            let type_name = text("Type").unwrap_or_default();
            let nullable = text("Null").is_some_and(|n| n.eq_ignore_ascii_case("yes"));
            let primary = text("Key").is_some_and(|k| k.eq_ignore_ascii_case("pri"));
            let autoincrement = text("Extra")
                .is_some_and(|e| e.to_lowercase().contains("auto_increment"));
            let default = match row.get("Default") {
                Some(Value::Null) | None => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            (field, type_name, nullable, default, primary, autoincrement)
        } else {
            let name = text("name")?;
            let type_name = text("type").unwrap_or_default();
            let primary = flag("pk");
            let base = split_declared_type(&type_name).0;
            let default = match row.get("dflt_value") {
                Some(Value::Null) | None => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            (
                name,
                type_name,
                !flag("notnull"),
                default,
                primary,
                primary && base == "INTEGER",
            )
        };

    let (base, args) = split_declared_type(&type_name);
    let (length, precision, scale) = type_sizes(&base, &args);

    Some(ColumnMetadata {
        name,
        type_name,
        nullable,
        default,
        length,
        precision,
        scale,
        autoincrement,
        primary,
    })
}

/// Group `SHOW INDEXES`-shaped rows into indexes.
fn indexes_from_catalog_rows(rows: &[Row]) -> Vec<IndexInfo> {
    let mut grouped: BTreeMap<String, IndexInfo> = BTreeMap::new();

    for row in rows {
        let Some(key) = row.get("Key_name").and_then(Value::as_str) else {
            continue;
        };
        let Some(column) = row.get("Column_name").and_then(Value::as_str) else {
            continue;
        };
        let non_unique = match row.get("Non_unique") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(1) != 0,
            Some(Value::String(s)) => s.trim() != "0",
            Some(Value::Bool(b)) => *b,
            _ => true,
        };
        let primary = key.eq_ignore_ascii_case("primary")
            || row.get("origin").and_then(Value::as_str) == Some("pk");

        grouped
            .entry(key.to_string())
            .or_insert_with(|| IndexInfo {
                name: key.to_string(),
                columns: Vec::new(),
                unique: !non_unique,
                primary,
            })
            .columns
            .push(column.to_string());
    }

    grouped.into_values().collect()
}
