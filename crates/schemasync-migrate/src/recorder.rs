//! Per-model schema fingerprints in the tracking table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use schemasync_common::{Error, Result};
use schemasync_config::MigratorConfig;
use schemasync_db::{Blueprint, Database, Row};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::schema::Schema;

const RECORD_COLUMNS: &str = "id, model_identity, schema_hash, schema_definition, \
                              last_migrated_at, version, successful, log";

/// The durable row tracking one model's last applied schema.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub model_identity: String,
    pub schema_hash: String,
    /// Serialised [`Schema`] as JSON.
    pub schema_definition: String,
    pub last_migrated_at: DateTime<Utc>,
    pub version: i64,
    pub successful: bool,
    pub log: String,
}

impl MigrationRecord {
    /// Decode the stored schema. `None` when the stored text is not a schema.
    pub fn schema(&self) -> Option<Schema> {
        match serde_json::from_str::<Schema>(&self.schema_definition) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(
                    model = %self.model_identity,
                    "stored schema definition is unreadable: {e}"
                );
                None
            }
        }
    }

    fn from_row(row: &Row) -> Result<Self> {
        let text = |key: &str| {
            row.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default()
        };
        let int = |key: &str| row.get(key).and_then(Value::as_i64);

        Ok(Self {
            id: int("id").ok_or_else(|| Error::Database("migration record without id".into()))?,
            model_identity: text("model_identity"),
            schema_hash: text("schema_hash"),
            schema_definition: text("schema_definition"),
            last_migrated_at: parse_datetime(&text("last_migrated_at")),
            version: int("version").unwrap_or(1),
            successful: match row.get("successful") {
                Some(Value::Bool(b)) => *b,
                Some(other) => other.as_i64().unwrap_or(0) != 0,
                None => false,
            },
            log: text("log"),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}

/// SHA-256 hex digest of the canonical form of `schema`.
///
/// Keys are sorted at both levels, booleans and nulls become the strings
/// `"true"`, `"false"` and `"null"`, and nested values are replaced by
/// their JSON text, so equivalent schemas always hash alike.
pub fn calculate_schema_hash(schema: &Schema) -> String {
    let canonical: BTreeMap<&str, BTreeMap<String, Value>> = schema
        .iter()
        .map(|(name, definition)| {
            let fields = match serde_json::to_value(definition).unwrap_or_default() {
                Value::Object(map) => map
                    .into_iter()
                    .map(|(key, value)| (key, canonical_scalar(value)))
                    .collect(),
                _ => BTreeMap::new(),
            };
            (name.as_str(), fields)
        })
        .collect();

    let encoded = serde_json::to_string(&canonical).unwrap_or_else(|_| "{}".to_string());
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_scalar(value: Value) -> Value {
    match value {
        Value::Null => Value::String("null".into()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar,
    }
}

/// Reads and writes [`MigrationRecord`]s.
///
/// The tracking table is created on first use. Failures are logged and
/// reported as `None`/`false`.
pub struct MigrationRecorder {
    db: Arc<dyn Database>,
    table: String,
    ensured: AtomicBool,
}

impl MigrationRecorder {
    pub fn new(db: Arc<dyn Database>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
            ensured: AtomicBool::new(false),
        }
    }

    pub fn from_config(db: Arc<dyn Database>, config: &MigratorConfig) -> Self {
        Self::new(db, config.tracking_table_name())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the tracking table if it is missing. Returns whether it exists.
    pub fn ensure_migration_table_exists(&self) -> bool {
        if self.ensured.load(Ordering::Acquire) {
            return true;
        }
        match self.create_tracking_table() {
            Ok(()) => {
                self.ensured.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                error!(table = %self.table, "failed to prepare migration table: {e}");
                false
            }
        }
    }

    fn create_tracking_table(&self) -> Result<()> {
        if self.db.table_exists(&self.table)? {
            return Ok(());
        }

        let mut table = Blueprint::new(&self.table);
        table.increments("id");
        table.string("model_identity", 255).unique();
        table.string("schema_hash", 64);
        table.long_text("schema_definition");
        table.timestamp("last_migrated_at");
        table.integer("version").default(1);
        table.boolean("successful").default(true);
        table.long_text("log").nullable();

        match self.db.create_table(&table) {
            Ok(()) => {
                info!(table = %self.table, "created migration table");
                Ok(())
            }
            // Someone else created it between the check and the create.
            Err(e) if e.is_duplicate_table() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn calculate_schema_hash(&self, schema: &Schema) -> String {
        calculate_schema_hash(schema)
    }

    pub fn get_migration_record(&self, model_identity: &str) -> Option<MigrationRecord> {
        if !self.ensure_migration_table_exists() {
            return None;
        }
        match self.fetch(model_identity) {
            Ok(record) => record,
            Err(e) => {
                error!(model = model_identity, "failed to read migration record: {e}");
                None
            }
        }
    }

    fn fetch(&self, model_identity: &str) -> Result<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE model_identity = ?",
            self.db.quote_identifier(&self.table)
        );
        let rows = self
            .db
            .query(&sql, &[Value::String(model_identity.to_string())])?;
        rows.first().map(MigrationRecord::from_row).transpose()
    }

    /// Store `schema` as the latest state of `model_identity`.
    ///
    /// Inserts at version 1 the first time and bumps the version by one on
    /// every later call, successful or not.
    pub fn record_migration(
        &self,
        model_identity: &str,
        schema: &Schema,
        successful: bool,
        log: &str,
    ) -> bool {
        if !self.ensure_migration_table_exists() {
            return false;
        }
        match self.write(model_identity, schema, successful, log) {
            Ok(version) => {
                debug!(model = model_identity, version, successful, "recorded migration");
                true
            }
            Err(e) => {
                error!(model = model_identity, "failed to record migration: {e}");
                false
            }
        }
    }

    fn write(
        &self,
        model_identity: &str,
        schema: &Schema,
        successful: bool,
        log: &str,
    ) -> Result<i64> {
        let table = self.db.quote_identifier(&self.table);
        let hash = calculate_schema_hash(schema);
        let definition = serde_json::to_string(schema)?;
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        match self.fetch(model_identity)? {
            Some(existing) => {
                let version = existing.version + 1;
                self.db.execute(
                    &format!(
                        "UPDATE {table} SET schema_hash = ?, schema_definition = ?, \
                         last_migrated_at = ?, version = ?, successful = ?, log = ? \
                         WHERE model_identity = ?"
                    ),
                    &[
                        Value::String(hash),
                        Value::String(definition),
                        Value::String(now),
                        Value::from(version),
                        Value::Bool(successful),
                        Value::String(log.to_string()),
                        Value::String(model_identity.to_string()),
                    ],
                )?;
                Ok(version)
            }
            None => {
                self.db.execute(
                    &format!(
                        "INSERT INTO {table} (model_identity, schema_hash, schema_definition, \
                         last_migrated_at, version, successful, log) \
                         VALUES (?, ?, ?, ?, 1, ?, ?)"
                    ),
                    &[
                        Value::String(model_identity.to_string()),
                        Value::String(hash),
                        Value::String(definition),
                        Value::String(now),
                        Value::Bool(successful),
                        Value::String(log.to_string()),
                    ],
                )?;
                Ok(1)
            }
        }
    }

    /// Every stored record, ordered by model identity.
    pub fn records(&self) -> Vec<MigrationRecord> {
        if !self.ensure_migration_table_exists() {
            return Vec::new();
        }
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY model_identity",
            self.db.quote_identifier(&self.table)
        );
        let rows = match self.db.query(&sql, &[]) {
            Ok(rows) => rows,
            Err(e) => {
                error!(table = %self.table, "failed to list migration records: {e}");
                return Vec::new();
            }
        };
        rows.iter()
            .filter_map(|row| MigrationRecord::from_row(row).ok())
            .collect()
    }
}
