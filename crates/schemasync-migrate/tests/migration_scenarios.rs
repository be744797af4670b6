use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use schemasync_common::{Error, Result};
use schemasync_config::{MigratorConfig, ModelManifest};
use schemasync_db::{
    Blueprint, Capabilities, CatalogQueries, ColumnKind, ColumnMetadata, ColumnSpec, Database,
    IndexInfo, Row, SqliteDatabase,
};
use schemasync_migrate::{
    ColumnDefinition, Model, ModelDescriptor, SchemaChangeKind, SchemaMigrator,
    calculate_schema_hash, compare_schemas, has_default_changed,
};
use serde_json::Value;

/// SQLite wrapper that logs DDL against non-temporary tables and can
/// pretend to alter columns or fail on demand.
struct Recording {
    inner: SqliteDatabase,
    ddl: Mutex<Vec<String>>,
    alterable: bool,
    fail_ddl: AtomicBool,
    fail_writes: AtomicBool,
}

impl Recording {
    fn new(alterable: bool) -> Self {
        Self::wrap(SqliteDatabase::in_memory().unwrap(), alterable)
    }

    fn wrap(inner: SqliteDatabase, alterable: bool) -> Self {
        Self {
            inner,
            ddl: Mutex::new(Vec::new()),
            alterable,
            fail_ddl: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn log(&self, table: &str, entry: String) -> Result<()> {
        if table.starts_with("tmp_") {
            return Ok(());
        }
        if self.fail_ddl.load(Ordering::SeqCst) {
            return Err(Error::Database(format!("refused: {entry}")));
        }
        self.ddl.lock().unwrap().push(entry);
        Ok(())
    }

    fn ddl_for(&self, table: &str) -> Vec<String> {
        self.ddl
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.split_whitespace().nth(1).is_some_and(|t| t.starts_with(table)))
            .cloned()
            .collect()
    }
}

impl Database for Recording {
    fn driver_name(&self) -> &'static str {
        "recording"
    }
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.inner.table_exists(table)
    }
    fn create_table(&self, blueprint: &Blueprint) -> Result<()> {
        self.log(blueprint.table(), format!("create {}", blueprint.table()))?;
        self.inner.create_table(blueprint)
    }
    fn drop_table_if_exists(&self, table: &str) -> Result<()> {
        self.log(table, format!("drop-table {table}"))?;
        self.inner.drop_table_if_exists(table)
    }
    fn add_column(&self, table: &str, column: &ColumnSpec) -> Result<()> {
        self.log(table, format!("add {table}.{}", column.name))?;
        self.inner.add_column(table, column)
    }
    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        self.log(table, format!("drop {table}.{column}"))?;
        self.inner.drop_column(table, column)
    }
    fn add_unique_index(&self, table: &str, column: &str) -> Result<()> {
        self.log(table, format!("index {table}.{column}"))?;
        self.inner.add_unique_index(table, column)
    }
    fn modify_column(&self, table: &str, column: &ColumnSpec) -> Result<()> {
        if !self.alterable {
            return self.inner.modify_column(table, column);
        }
        let kind = match &column.kind {
            ColumnKind::String { length } => format!("VARCHAR({length})"),
            other => format!("{other:?}"),
        };
        let null = if column.nullable { "NULL" } else { "NOT NULL" };
        self.log(table, format!("modify {table}.{} {kind} {null}", column.name))
    }
    fn supports_column_alteration(&self) -> bool {
        self.alterable
    }
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("write refused".into()));
        }
        self.inner.execute(sql, params)
    }
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner.query(sql, params)
    }
    fn column_metadata(&self, table: &str) -> Result<Option<Vec<ColumnMetadata>>> {
        self.inner.column_metadata(table)
    }
    fn column_listing(&self, table: &str) -> Result<Option<Vec<String>>> {
        self.inner.column_listing(table)
    }
    fn column_detail(&self, table: &str, column: &str) -> Result<Option<ColumnMetadata>> {
        self.inner.column_detail(table, column)
    }
    fn catalog_queries(&self, table: &str) -> Option<CatalogQueries> {
        self.inner.catalog_queries(table)
    }
    fn indexes(&self, table: &str) -> Result<Option<Vec<IndexInfo>>> {
        self.inner.indexes(table)
    }
}

fn users(email: Option<&'static str>) -> ModelDescriptor {
    ModelDescriptor::new("app::models::User", "users", move |t| {
        t.string("name", 255);
        if let Some(column) = email {
            t.string(column, 255).nullable();
        }
    })
}

fn setup(alterable: bool) -> (Arc<Recording>, SchemaMigrator) {
    let db = Arc::new(Recording::new(alterable));
    let migrator = SchemaMigrator::new(db.clone());
    (db, migrator)
}

#[test]
fn missing_table_is_created_at_version_one() {
    let (db, migrator) = setup(false);
    let model = users(None);

    assert!(migrator.needs_migration(&model));
    let outcome = migrator.migrate_model(&model);
    assert!(outcome.success, "{}", outcome.log);
    assert_eq!(db.ddl_for("users"), ["create users"]);

    let record = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(record.version, 1);
    assert!(record.successful);
    assert!(!migrator.needs_migration(&model));
}

#[test]
fn second_run_issues_no_ddl() {
    let (db, migrator) = setup(false);
    let model = users(None);

    assert!(migrator.migrate_model(&model).success);
    let first = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    let before = db.ddl_for("users").len();

    assert!(migrator.migrate_model(&model).success);
    let second = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();

    assert_eq!(db.ddl_for("users").len(), before);
    assert_eq!(second.version, first.version);
    assert_eq!(second.schema_hash, first.schema_hash);
}

#[test]
fn added_nullable_column_is_applied() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    let before = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();

    let old = migrator.extractor().extract_from_model(&users(None));
    let new = migrator.extractor().extract_from_model(&users(Some("email")));
    let changes = compare_schemas(&old, &new);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, SchemaChangeKind::ColumnAdded);
    assert_eq!(changes[0].column_name, "email");

    let outcome = migrator.migrate_model(&users(Some("email")));
    assert!(outcome.success, "{}", outcome.log);
    assert!(db.ddl_for("users").contains(&"add users.email".to_string()));

    let after = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(after.version, before.version + 1);
    assert_ne!(after.schema_hash, before.schema_hash);
    assert_eq!(after.schema_hash, calculate_schema_hash(&new));
}

#[test]
fn rename_is_a_drop_and_an_add() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(Some("email")));

    let old = migrator.extractor().extract_from_model(&users(Some("email")));
    let new = migrator
        .extractor()
        .extract_from_model(&users(Some("email_address")));
    let kinds: Vec<_> = compare_schemas(&old, &new)
        .into_iter()
        .map(|c| (c.kind, c.column_name))
        .collect();
    assert_eq!(
        kinds,
        [
            (SchemaChangeKind::ColumnAdded, "email_address".to_string()),
            (SchemaChangeKind::ColumnRemoved, "email".to_string()),
        ]
    );

    let outcome = migrator.migrate_model(&users(Some("email_address")));
    assert!(outcome.success, "{}", outcome.log);
    let ddl = db.ddl_for("users");
    assert!(ddl.contains(&"add users.email_address".to_string()));
    assert!(ddl.contains(&"drop users.email".to_string()));

    let columns = db.column_listing("users").unwrap().unwrap();
    assert!(columns.contains(&"email_address".to_string()));
    assert!(!columns.contains(&"email".to_string()));
}

#[test]
fn timestamp_synonyms_are_not_a_default_change() {
    let a = ColumnDefinition::new("seen_at", "TIMESTAMP").with_default("CURRENT_TIMESTAMP");
    let b = ColumnDefinition::new("seen_at", "TIMESTAMP").with_default("NOW()");
    assert!(!has_default_changed(&a, &b));
}

fn sized_name(length: u32, nullable: bool) -> ModelDescriptor {
    ModelDescriptor::new("app::models::User", "users", move |t| {
        let column = t.string("name", length);
        if nullable {
            column.nullable();
        }
    })
}

#[test]
fn changed_column_is_altered_once_with_full_target_shape() {
    let (db, migrator) = setup(true);
    migrator.migrate_model(&sized_name(255, false));

    let outcome = migrator.migrate_model(&sized_name(100, true));
    assert!(outcome.success, "{}", outcome.log);
    assert!(outcome.log.contains("Column 'name' type changed from VARCHAR(255) to VARCHAR(100)"));
    assert!(outcome.log.contains("Column 'name' nullability changed from NOT NULL to NULL"));

    let modifies: Vec<_> = db
        .ddl_for("users")
        .into_iter()
        .filter(|e| e.starts_with("modify"))
        .collect();
    assert_eq!(modifies, ["modify users.name VARCHAR(100) NULL"]);
}

#[test]
fn unsupported_alteration_is_skipped_and_recorded() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&sized_name(255, false));

    let outcome = migrator.migrate_model(&sized_name(100, false));
    assert!(outcome.success, "{}", outcome.log);
    assert!(outcome.log.contains("alteration skipped"));
    assert!(db.ddl_for("users").iter().all(|e| !e.starts_with("modify")));

    let record = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(record.version, 2);
    assert!(!migrator.needs_migration(&sized_name(100, false)));
}

#[test]
fn failed_batch_is_recorded_and_retried() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    let first = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();

    db.fail_ddl.store(true, Ordering::SeqCst);
    let outcome = migrator.migrate_model(&users(Some("email")));
    assert!(!outcome.success);
    assert!(outcome.log.contains("Migration failed"));

    let failed = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(failed.version, 2);
    assert!(!failed.successful);
    assert_eq!(failed.schema_hash, first.schema_hash);
    assert!(migrator.needs_migration(&users(Some("email"))));

    db.fail_ddl.store(false, Ordering::SeqCst);
    let outcome = migrator.migrate_model(&users(Some("email")));
    assert!(outcome.success, "{}", outcome.log);
    let fixed = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(fixed.version, 3);
    assert!(fixed.successful);
}

#[test]
fn not_null_column_is_backfilled() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    db.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .unwrap();

    let with_score = ModelDescriptor::new("app::models::User", "users", |t| {
        t.string("name", 255);
        t.integer("score");
    });
    let outcome = migrator.migrate_model(&with_score);
    assert!(outcome.success, "{}", outcome.log);

    let rows = db.query("SELECT score FROM users", &[]).unwrap();
    assert_eq!(rows[0].get("score"), Some(&Value::from(0)));
}

#[test]
fn not_null_timestamp_is_added_to_a_populated_table() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    db.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .unwrap();

    let published = || {
        ModelDescriptor::new("app::models::User", "users", |t| {
            t.string("name", 255);
            t.timestamp("published_at");
        })
    };
    let outcome = migrator.migrate_model(&published());
    assert!(outcome.success, "{}", outcome.log);

    let rows = db.query("SELECT published_at FROM users", &[]).unwrap();
    let stamp = rows[0].get("published_at").and_then(Value::as_str).unwrap();
    assert_eq!(stamp.len(), 19);

    assert!(!migrator.needs_migration(&published()));
    let again = migrator.migrate_model(&published());
    assert!(again.log.contains("up to date"), "{}", again.log);
}

fn with_slug() -> ModelDescriptor {
    ModelDescriptor::new("app::models::User", "users", |t| {
        t.string("name", 255);
        t.string("slug", 100).unique();
    })
}

#[test]
fn unique_column_is_not_half_added() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    db.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .unwrap();
    db.execute("INSERT INTO users (name) VALUES ('grace')", &[])
        .unwrap();

    // Both rows would be backfilled with '' which breaks the unique index.
    for _ in 0..2 {
        let outcome = migrator.migrate_model(&with_slug());
        assert!(!outcome.success, "{}", outcome.log);
        let columns = db.column_listing("users").unwrap().unwrap();
        assert!(!columns.contains(&"slug".to_string()));
    }
    let record = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert!(!record.successful);
    assert!(migrator.needs_migration(&with_slug()));

    db.execute("DELETE FROM users WHERE name = 'grace'", &[])
        .unwrap();
    let outcome = migrator.migrate_model(&with_slug());
    assert!(outcome.success, "{}", outcome.log);
    let indexes = db.indexes("users").unwrap().unwrap();
    assert!(indexes.iter().any(|i| i.unique && i.columns == ["slug"]));
}

#[test]
fn present_column_missing_its_unique_index_gets_one() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));
    db.execute("INSERT INTO users (name) VALUES ('ada')", &[])
        .unwrap();
    db.execute(
        "ALTER TABLE users ADD COLUMN slug VARCHAR(100) NOT NULL DEFAULT ''",
        &[],
    )
    .unwrap();

    let outcome = migrator.migrate_model(&with_slug());
    assert!(outcome.success, "{}", outcome.log);
    assert!(outcome.log.contains("unique index added"), "{}", outcome.log);
    assert_eq!(db.ddl_for("users").last().map(String::as_str), Some("index users.slug"));

    let indexes = db.indexes("users").unwrap().unwrap();
    assert!(indexes.iter().any(|i| i.unique && i.columns == ["slug"]));
    assert!(!migrator.needs_migration(&with_slug()));
}

#[test]
fn unrecorded_failure_is_reported() {
    let (db, migrator) = setup(false);
    migrator.migrate_model(&users(None));

    db.fail_ddl.store(true, Ordering::SeqCst);
    db.fail_writes.store(true, Ordering::SeqCst);
    let outcome = migrator.migrate_model(&users(Some("email")));
    assert!(!outcome.success);
    assert!(outcome.log.contains("Migration failed"));
    assert!(outcome.log.ends_with("Failed to record migration"), "{}", outcome.log);

    let record = migrator
        .recorder()
        .get_migration_record("app::models::User")
        .unwrap();
    assert_eq!(record.version, 1);
}

#[test]
fn batch_reports_every_model() {
    let (_db, migrator) = setup(false);
    let models: Vec<Box<dyn Model>> = vec![
        Box::new(users(None)),
        Box::new(ModelDescriptor::new("app::models::Tag", "tags", |t| {
            t.string("label", 50).unique();
        })),
    ];

    let pending = migrator.get_models_needing_migration(&models);
    assert_eq!(pending.len(), 2);

    let results = migrator.migrate_all(&models);
    assert!(results.values().all(|o| o.success));
    assert!(migrator.get_models_needing_migration(&models).is_empty());
}

#[test]
fn catalog_tier_supports_the_whole_cycle() {
    let inner = SqliteDatabase::in_memory().unwrap().with_capabilities(Capabilities {
        column_metadata: false,
        column_listing: false,
        catalog_sql: true,
    });
    let db = Arc::new(Recording::wrap(inner, false));
    let migrator = SchemaMigrator::new(db.clone());

    assert!(migrator.migrate_model(&users(None)).success);
    let outcome = migrator.migrate_model(&users(Some("email")));
    assert!(outcome.success, "{}", outcome.log);
    assert!(!migrator.needs_migration(&users(Some("email"))));
}

#[test]
fn records_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let config = MigratorConfig {
        table_prefix: "app_".to_string(),
        ..Default::default()
    };

    {
        let db = Arc::new(SqliteDatabase::open(&path).unwrap());
        let migrator = SchemaMigrator::from_config(db.clone(), &config);
        assert!(migrator.migrate_model(&users(None)).success);
        assert!(db.table_exists("app_schema_migrations").unwrap());
    }

    let db = Arc::new(SqliteDatabase::open(&path).unwrap());
    let migrator = SchemaMigrator::from_config(db, &config);
    assert!(!migrator.needs_migration(&users(None)));
}

#[test]
fn manifest_models_migrate_like_code_models() {
    let manifest: ModelManifest = serde_yaml::from_str(
        r#"
identity: app::models::Invoice
table: invoices
columns:
  - { name: number, type: string, length: 32, unique: true }
  - { name: total, type: decimal, precision: 12, scale: 2, default: 0 }
  - { name: paid, type: boolean, default: false }
"#,
    )
    .unwrap();
    let model = ModelDescriptor::from_manifest(&manifest);

    let (db, migrator) = setup(false);
    assert!(migrator.migrate_model(&model).success);
    assert!(!migrator.needs_migration(&model));

    let schema = migrator.extractor().extract_from_model(&model);
    assert!(schema["number"].unique);
    assert_eq!(schema["total"].precision, Some(12));
    assert_eq!(
        db.column_listing("invoices").unwrap().unwrap(),
        ["id", "number", "total", "paid", "created_at", "updated_at"]
    );
}
