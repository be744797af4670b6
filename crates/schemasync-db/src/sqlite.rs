use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params, params_from_iter};
use schemasync_common::{Error, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::blueprint::{Blueprint, ColumnKind, ColumnSpec};
use crate::database::{
    CatalogQueries, ColumnMetadata, Database, IndexInfo, Row, is_current_timestamp, quote_literal,
    render_default, split_declared_type,
};

/// Which introspection tiers a [`SqliteDatabase`] exposes.
///
/// SQLite supports all of them; switching tiers off lets callers exercise
/// the fallbacks a poorer driver would force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub column_metadata: bool,
    pub column_listing: bool,
    pub catalog_sql: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            column_metadata: true,
            column_listing: true,
            catalog_sql: true,
        }
    }
}

/// SQLite backend for the [`Database`] abstraction.
///
/// SQLite cannot alter a column in place, so
/// [`Database::supports_column_alteration`] is false.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    capabilities: Capabilities,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            capabilities: Capabilities::default(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            capabilities: Capabilities::default(),
        })
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("sqlite connection lock poisoned".into()))
    }

    fn run_ddl(&self, sql: &str, context: &str) -> Result<()> {
        debug!("{context}: {sql}");
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("{context}: {e}")))
    }

    fn table_info(&self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let rows = self.query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
            &[Value::String(table.to_string())],
        )?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("table {table}")));
        }
        Ok(rows.iter().map(metadata_from_pragma).collect())
    }

    fn column_definition_sql(&self, column: &ColumnSpec, inline_unique: bool) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            native_type(&column.kind)
        );

        if matches!(column.kind, ColumnKind::Increments) {
            sql.push_str(" NOT NULL PRIMARY KEY AUTOINCREMENT");
            return sql;
        }

        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&render_default(default));
        }
        if inline_unique && column.unique {
            sql.push_str(" UNIQUE");
        }
        sql
    }

    fn unique_index_name(table: &str, column: &str) -> String {
        format!("{table}_{column}_unique")
    }

    fn unique_index_sql(&self, table: &str, column: &str) -> String {
        format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            self.quote_identifier(&Self::unique_index_name(table, column)),
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }
}

/// Declared SQLite type for each abstract column kind. SQLite keeps the
/// declared text verbatim, so catalog reads report these names back.
fn native_type(kind: &ColumnKind) -> String {
    match kind {
        ColumnKind::Increments | ColumnKind::Integer => "INTEGER".into(),
        ColumnKind::BigInteger => "BIGINT".into(),
        ColumnKind::SmallInteger => "SMALLINT".into(),
        ColumnKind::TinyInteger => "TINYINT".into(),
        ColumnKind::Boolean => "TINYINT(1)".into(),
        ColumnKind::String { length } => format!("VARCHAR({length})"),
        ColumnKind::Char { length } => format!("CHAR({length})"),
        ColumnKind::Text => "TEXT".into(),
        ColumnKind::MediumText => "MEDIUMTEXT".into(),
        ColumnKind::LongText => "LONGTEXT".into(),
        ColumnKind::Float => "FLOAT".into(),
        ColumnKind::Double => "DOUBLE".into(),
        ColumnKind::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
        ColumnKind::Date => "DATE".into(),
        ColumnKind::DateTime => "DATETIME".into(),
        ColumnKind::Timestamp => "TIMESTAMP".into(),
        ColumnKind::Time => "TIME".into(),
        ColumnKind::Year => "YEAR".into(),
        ColumnKind::Json => "JSON".into(),
        ColumnKind::Binary => "BLOB".into(),
        ColumnKind::Enum { .. } => "VARCHAR(255)".into(),
    }
}

/// The current time as a constant literal for a temporal column.
fn current_literal(kind: &ColumnKind) -> String {
    let format = match kind {
        ColumnKind::Date => "%Y-%m-%d",
        ColumnKind::Time => "%H:%M:%S",
        _ => "%Y-%m-%d %H:%M:%S",
    };
    Utc::now().format(format).to_string()
}

fn metadata_from_pragma(row: &Row) -> ColumnMetadata {
    let name = row
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let type_name = row
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let not_null = row.get("notnull").and_then(Value::as_i64).unwrap_or(0) != 0;
    let primary = row.get("pk").and_then(Value::as_i64).unwrap_or(0) > 0;
    let default = row
        .get("dflt_value")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (base, args) = split_declared_type(&type_name);
    let (length, precision, scale) = match base.as_str() {
        "DECIMAL" | "NUMERIC" => (None, args.first().copied(), args.get(1).copied()),
        _ => (args.first().copied(), None, None),
    };

    ColumnMetadata {
        name,
        // INTEGER PRIMARY KEY aliases the rowid and auto-assigns values.
        autoincrement: primary && base == "INTEGER",
        type_name,
        nullable: !not_null,
        default,
        length,
        precision,
        scale,
        primary,
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

impl Database for SqliteDatabase {
    fn driver_name(&self) -> &'static str {
        "sqlite"
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))
    }

    fn create_table(&self, blueprint: &Blueprint) -> Result<()> {
        let table = blueprint.table();
        let mut parts: Vec<String> = blueprint
            .columns()
            .iter()
            .map(|c| self.column_definition_sql(c, true))
            .collect();

        let keys: Vec<String> = blueprint
            .columns()
            .iter()
            .filter(|c| c.primary && !matches!(c.kind, ColumnKind::Increments))
            .map(|c| self.quote_identifier(&c.name))
            .collect();
        if !keys.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        let sql = format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            parts.join(", ")
        );
        debug!("creating table: {sql}");

        let conn = self.connection()?;
        conn.execute_batch(&sql).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("already exists") {
                Error::DuplicateTable(table.to_string())
            } else {
                Error::Database(format!("failed to create table {table}: {msg}"))
            }
        })
    }

    fn drop_table_if_exists(&self, table: &str) -> Result<()> {
        self.run_ddl(
            &format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table)),
            &format!("failed to drop table {table}"),
        )
    }

    fn add_column(&self, table: &str, column: &ColumnSpec) -> Result<()> {
        let context = format!("failed to add column {table}.{}", column.name);
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("{context}: {e}")))?;

        // ADD COLUMN rejects non-constant defaults once the table holds rows.
        let mut column = column.clone();
        if column.default.as_ref().is_some_and(is_current_timestamp) {
            let has_rows: bool = tx
                .query_row(
                    &format!("SELECT EXISTS (SELECT 1 FROM {})", self.quote_identifier(table)),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| Error::Database(format!("{context}: {e}")))?;
            if has_rows {
                let now = current_literal(&column.kind);
                warn!(table, column = %column.name, %now, "backfilling existing rows with a fixed timestamp");
                column.default(now);
            }
        }

        // SQLite refuses UNIQUE in ADD COLUMN; a unique index is equivalent.
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition_sql(&column, false)
        );
        debug!("{context}: {sql}");
        tx.execute_batch(&sql)
            .map_err(|e| Error::Database(format!("{context}: {e}")))?;

        if column.unique {
            let sql = self.unique_index_sql(table, &column.name);
            debug!("{context}: {sql}");
            tx.execute_batch(&sql).map_err(|e| {
                Error::Database(format!(
                    "failed to add unique index on {table}.{}: {e}",
                    column.name
                ))
            })?;
        }

        tx.commit()
            .map_err(|e| Error::Database(format!("{context}: {e}")))
    }

    fn add_unique_index(&self, table: &str, column: &str) -> Result<()> {
        self.run_ddl(
            &self.unique_index_sql(table, column),
            &format!("failed to add unique index on {table}.{column}"),
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        // Explicit indexes covering the column block the drop.
        let covering: Vec<String> = self
            .indexes(table)?
            .unwrap_or_default()
            .into_iter()
            .filter(|idx| !idx.primary && idx.columns.iter().any(|c| c == column))
            .map(|idx| idx.name)
            .filter(|name| !name.starts_with("sqlite_autoindex_"))
            .collect();

        for index in covering {
            self.run_ddl(
                &format!("DROP INDEX IF EXISTS {}", self.quote_identifier(&index)),
                &format!("failed to drop index {index}"),
            )?;
        }

        self.run_ddl(
            &format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            ),
            &format!("failed to drop column {table}.{column}"),
        )
    }

    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<()> {
        Err(Error::Unsupported(format!(
            "sqlite cannot alter column {table}.{} in place",
            column.name
        )))
    }

    fn supports_column_alteration(&self) -> bool {
        false
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.connection()?;
        conn.execute(sql, params_from_iter(params.iter().map(to_sql_value)))
            .map_err(|e| Error::Database(format!("statement failed: {e}")))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt
            .query_map(params_from_iter(params.iter().map(to_sql_value)), |row| {
                let mut map = Row::new();
                for (idx, name) in names.iter().enumerate() {
                    map.insert(name.clone(), from_value_ref(row.get_ref(idx)?));
                }
                Ok(map)
            })
            .map_err(|e| Error::Database(format!("query failed: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))
    }

    fn column_metadata(&self, table: &str) -> Result<Option<Vec<ColumnMetadata>>> {
        if !self.capabilities.column_metadata {
            return Ok(None);
        }
        self.table_info(table).map(Some)
    }

    fn column_listing(&self, table: &str) -> Result<Option<Vec<String>>> {
        if !self.capabilities.column_listing {
            return Ok(None);
        }
        let rows = self.query(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
            &[Value::String(table.to_string())],
        )?;
        Ok(Some(
            rows.iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
                .collect(),
        ))
    }

    fn column_detail(&self, table: &str, column: &str) -> Result<Option<ColumnMetadata>> {
        if !self.capabilities.column_listing {
            return Ok(None);
        }
        let rows = self.query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) WHERE name = ?2",
            &[
                Value::String(table.to_string()),
                Value::String(column.to_string()),
            ],
        )?;
        Ok(rows.first().map(metadata_from_pragma))
    }

    fn catalog_queries(&self, table: &str) -> Option<CatalogQueries> {
        if !self.capabilities.catalog_sql {
            return None;
        }
        let table = quote_literal(table);
        Some(CatalogQueries {
            columns: format!(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info({table}) ORDER BY cid"
            ),
            indexes: format!(
                "SELECT il.name AS Key_name, ii.name AS Column_name, \
                        1 - il.\"unique\" AS Non_unique, il.origin AS origin \
                 FROM pragma_index_list({table}) AS il \
                 JOIN pragma_index_info(il.name) AS ii \
                 ORDER BY il.name, ii.seqno"
            ),
        })
    }

    fn indexes(&self, table: &str) -> Result<Option<Vec<IndexInfo>>> {
        let list = self.query(
            "SELECT name, \"unique\", origin FROM pragma_index_list(?1)",
            &[Value::String(table.to_string())],
        )?;

        let mut indexes = Vec::with_capacity(list.len());
        for row in list {
            let Some(name) = row.get("name").and_then(Value::as_str) else {
                continue;
            };
            let columns = self
                .query(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &[Value::String(name.to_string())],
                )?
                .iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
                .collect();

            indexes.push(IndexInfo {
                name: name.to_string(),
                columns,
                unique: row.get("unique").and_then(Value::as_i64).unwrap_or(0) != 0,
                primary: row.get("origin").and_then(Value::as_str) == Some("pk"),
            });
        }
        Ok(Some(indexes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_blueprint() -> Blueprint {
        let mut bp = Blueprint::new("users");
        bp.increments("id");
        bp.string("email", 191).unique();
        bp.decimal("balance", 10, 2).default(0);
        bp.boolean("active").default(true);
        bp.text("bio").nullable();
        bp
    }

    #[test]
    fn create_table_and_check_existence() {
        let db = SqliteDatabase::in_memory().unwrap();
        assert!(!db.table_exists("users").unwrap());
        db.create_table(&users_blueprint()).unwrap();
        assert!(db.table_exists("users").unwrap());
    }

    #[test]
    fn creating_twice_reports_duplicate_table() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        let err = db.create_table(&users_blueprint()).unwrap_err();
        assert!(matches!(err, Error::DuplicateTable(_)));
        assert!(err.is_duplicate_table());
    }

    #[test]
    fn column_metadata_reports_declared_shape() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();

        let cols = db.column_metadata("users").unwrap().unwrap();
        assert_eq!(cols.len(), 5);

        let id = &cols[0];
        assert!(id.primary);
        assert!(id.autoincrement);
        assert!(!id.nullable);

        let email = &cols[1];
        assert_eq!(email.type_name, "VARCHAR(191)");
        assert_eq!(email.length, Some(191));

        let balance = &cols[2];
        assert_eq!(balance.precision, Some(10));
        assert_eq!(balance.scale, Some(2));
        assert_eq!(balance.default.as_deref(), Some("0"));

        assert!(cols[4].nullable);
    }

    #[test]
    fn missing_table_metadata_is_not_found() {
        let db = SqliteDatabase::in_memory().unwrap();
        let err = db.column_metadata("ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn indexes_detect_single_column_unique() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();

        let indexes = db.indexes("users").unwrap().unwrap();
        let unique: Vec<_> = indexes.iter().filter(|i| i.unique && !i.primary).collect();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].columns, vec!["email".to_string()]);
    }

    #[test]
    fn disabled_tiers_report_none() {
        let db = SqliteDatabase::in_memory().unwrap().with_capabilities(Capabilities {
            column_metadata: false,
            column_listing: false,
            catalog_sql: false,
        });
        db.create_table(&users_blueprint()).unwrap();
        assert!(db.column_metadata("users").unwrap().is_none());
        assert!(db.column_listing("users").unwrap().is_none());
        assert!(db.column_detail("users", "email").unwrap().is_none());
        assert!(db.catalog_queries("users").is_none());
    }

    #[test]
    fn catalog_queries_return_show_shaped_rows() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        let queries = db.catalog_queries("users").unwrap();

        let columns = db.query(&queries.columns, &[]).unwrap();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[1].get("name"), Some(&json!("email")));

        let indexes = db.query(&queries.indexes, &[]).unwrap();
        assert!(indexes.iter().any(|r| {
            r.get("Column_name") == Some(&json!("email")) && r.get("Non_unique") == Some(&json!(0))
        }));
    }

    #[test]
    fn add_unique_column_uses_index_and_drop_removes_it() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();

        let mut spec = ColumnSpec::new("handle", ColumnKind::String { length: 64 });
        spec.nullable().unique();
        db.add_column("users", &spec).unwrap();

        let indexes = db.indexes("users").unwrap().unwrap();
        assert!(indexes.iter().any(|i| i.name == "users_handle_unique" && i.unique));

        db.drop_column("users", "handle").unwrap();
        let names = db.column_listing("users").unwrap().unwrap();
        assert!(!names.contains(&"handle".to_string()));
    }

    #[test]
    fn current_timestamp_default_on_populated_table_becomes_literal() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        db.execute("INSERT INTO users (email) VALUES ('a@example.com')", &[]).unwrap();

        let mut spec = ColumnSpec::new("seen_at", ColumnKind::Timestamp);
        spec.default("CURRENT_TIMESTAMP");
        db.add_column("users", &spec).unwrap();

        let rows = db.query("SELECT seen_at FROM users", &[]).unwrap();
        let seen = rows[0].get("seen_at").and_then(Value::as_str).unwrap();
        assert_eq!(seen.len(), 19);

        // An empty table keeps the expression.
        db.execute("DELETE FROM users", &[]).unwrap();
        let mut spec = ColumnSpec::new("touched_at", ColumnKind::Timestamp);
        spec.default("now()");
        db.add_column("users", &spec).unwrap();
        let detail = db.column_detail("users", "touched_at").unwrap().unwrap();
        assert_eq!(detail.default.as_deref(), Some("CURRENT_TIMESTAMP"));
    }

    #[test]
    fn failed_unique_index_rolls_back_the_column() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        db.execute("INSERT INTO users (email) VALUES ('a@example.com')", &[]).unwrap();
        db.execute("INSERT INTO users (email) VALUES ('b@example.com')", &[]).unwrap();

        let mut spec = ColumnSpec::new("slug", ColumnKind::String { length: 100 });
        spec.default("").unique();
        assert!(db.add_column("users", &spec).is_err());

        let names = db.column_listing("users").unwrap().unwrap();
        assert!(!names.contains(&"slug".to_string()));
    }

    #[test]
    fn unique_index_on_existing_column() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        db.add_unique_index("users", "bio").unwrap();

        let indexes = db.indexes("users").unwrap().unwrap();
        assert!(indexes.iter().any(|i| i.name == "users_bio_unique" && i.unique));
        assert!(db.add_unique_index("users", "bio").is_err());
    }

    #[test]
    fn modify_column_is_unsupported() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        assert!(!db.supports_column_alteration());
        let spec = ColumnSpec::new("bio", ColumnKind::LongText);
        assert!(matches!(
            db.modify_column("users", &spec),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn execute_and_query_bind_json_values() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.create_table(&users_blueprint()).unwrap();
        let affected = db
            .execute(
                "INSERT INTO users (email, balance, active) VALUES (?1, ?2, ?3)",
                &[json!("a@example.com"), json!(12.5), json!(false)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db
            .query("SELECT email, balance, active FROM users WHERE email = ?1", &[json!("a@example.com")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("balance"), Some(&json!(12.5)));
        assert_eq!(rows[0].get("active"), Some(&json!(0)));
    }
}
