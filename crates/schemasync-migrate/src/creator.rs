use std::sync::Arc;

use schemasync_db::Database;
use tracing::{error, info};

use crate::model::{Model, blueprint_for};
use crate::outcome::MigrationOutcome;

/// Creates the table of a model that has none yet.
pub struct TableCreator {
    db: Arc<dyn Database>,
}

impl TableCreator {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create the model's table. An existing table is left alone and
    /// reported as a skipped success.
    pub fn create_table(&self, model: &dyn Model) -> MigrationOutcome {
        let table = model.table();

        match self.db.table_exists(&table) {
            Ok(true) => {
                return MigrationOutcome::success(format!(
                    "Table {table} already exists, skipped"
                ));
            }
            Ok(false) => {}
            Err(e) => {
                error!(model = %model.identity(), table = %table, "table check failed: {e}");
                return MigrationOutcome::failure(format!("Failed to create table {table}: {e}"));
            }
        }

        match self.db.create_table(&blueprint_for(model, &table)) {
            Ok(()) => {
                info!(model = %model.identity(), table = %table, "created table");
                MigrationOutcome::success(format!("Table {table} created"))
            }
            Err(e) => {
                error!(model = %model.identity(), table = %table, "failed to create table: {e}");
                MigrationOutcome::failure(format!("Failed to create table {table}: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDescriptor;
    use schemasync_db::SqliteDatabase;

    fn post() -> ModelDescriptor {
        ModelDescriptor::new("app::Post", "posts", |t| {
            t.string("title", 200);
        })
    }

    #[test]
    fn creates_missing_table() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());
        let creator = TableCreator::new(db.clone());

        let outcome = creator.create_table(&post());
        assert!(outcome.success, "{}", outcome.log);
        assert_eq!(outcome.log, "Table posts created");

        let columns = db.column_listing("posts").unwrap().unwrap();
        assert_eq!(columns, ["id", "title", "created_at", "updated_at"]);
    }

    #[test]
    fn existing_table_is_skipped() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());
        let creator = TableCreator::new(db);
        assert!(creator.create_table(&post()).success);

        let again = creator.create_table(&post());
        assert!(again.success);
        assert!(again.log.contains("skipped"));
    }

    #[test]
    fn driver_errors_become_failures() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());
        let creator = TableCreator::new(db);
        // A second primary key next to the incrementing id is rejected.
        let clash = ModelDescriptor::new("app::Clash", "clash", |t| {
            t.string("code", 10).primary();
        });

        let outcome = creator.create_table(&clash);
        assert!(!outcome.success);
        assert!(outcome.log.starts_with("Failed to create table clash"));
    }
}
