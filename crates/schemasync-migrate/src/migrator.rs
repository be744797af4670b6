//! Orchestration: decides what each model needs and carries it out.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemasync_config::MigratorConfig;
use schemasync_db::Database;
use tracing::{debug, error, info, warn};

use crate::alter::AlterApplier;
use crate::comparator::compare_schemas;
use crate::creator::TableCreator;
use crate::extractor::SchemaExtractor;
use crate::model::Model;
use crate::outcome::MigrationOutcome;
use crate::recorder::{MigrationRecorder, calculate_schema_hash};
use crate::schema::Schema;

/// Keeps model tables in line with their definitions.
///
/// Every operation is blocking and assumes a single writer. Failures are
/// logged and reported through [`MigrationOutcome`], never returned as errors.
pub struct SchemaMigrator {
    db: Arc<dyn Database>,
    extractor: SchemaExtractor,
    creator: TableCreator,
    recorder: MigrationRecorder,
    applier: AlterApplier,
}

impl SchemaMigrator {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::from_config(db, &MigratorConfig::default())
    }

    pub fn from_config(db: Arc<dyn Database>, config: &MigratorConfig) -> Self {
        Self {
            extractor: SchemaExtractor::from_config(db.clone(), config),
            creator: TableCreator::new(db.clone()),
            recorder: MigrationRecorder::from_config(db.clone(), config),
            applier: AlterApplier::new(db.clone()),
            db,
        }
    }

    pub fn extractor(&self) -> &SchemaExtractor {
        &self.extractor
    }

    pub fn recorder(&self) -> &MigrationRecorder {
        &self.recorder
    }

    /// False only when the table exists, a record exists and the recorded
    /// hash matches the model's freshly extracted schema.
    pub fn needs_migration(&self, model: &dyn Model) -> bool {
        let identity = model.identity();
        let table = model.table();

        match self.db.table_exists(&table) {
            Ok(true) => {}
            Ok(false) => return true,
            Err(e) => {
                warn!(model = %identity, table = %table, "table check failed: {e}");
                return true;
            }
        }

        let Some(record) = self.recorder.get_migration_record(&identity) else {
            return true;
        };

        let current = self.extractor.extract_from_model(model);
        if current.is_empty() {
            warn!(model = %identity, "could not extract schema, assuming migration needed");
            return true;
        }

        record.schema_hash != calculate_schema_hash(&current)
    }

    /// The subset of `models` that need migrating, keyed by identity.
    pub fn get_models_needing_migration<'a>(
        &self,
        models: &'a [Box<dyn Model>],
    ) -> BTreeMap<String, &'a dyn Model> {
        models
            .iter()
            .map(|model| &**model)
            .filter(|model| self.needs_migration(*model))
            .map(|model| (model.identity(), model))
            .collect()
    }

    /// Bring one model's table up to date.
    pub fn migrate_model(&self, model: &dyn Model) -> MigrationOutcome {
        let identity = model.identity();
        let table = model.table();
        debug!(model = %identity, table = %table, "migrating model");

        match self.db.table_exists(&table) {
            Ok(true) => self.migrate_existing(model, &identity, &table),
            Ok(false) => self.create(model, &identity),
            Err(e) => {
                error!(model = %identity, table = %table, "table check failed: {e}");
                MigrationOutcome::failure(format!("Failed to inspect table {table}: {e}"))
            }
        }
    }

    /// Migrate each model independently; one failure does not stop the rest.
    pub fn migrate_all(&self, models: &[Box<dyn Model>]) -> BTreeMap<String, MigrationOutcome> {
        let mut results = BTreeMap::new();
        for model in models {
            let outcome = self.migrate_model(&**model);
            if !outcome.success {
                warn!(model = %model.identity(), "migration failed: {}", outcome.log);
            }
            results.insert(model.identity(), outcome);
        }

        let failed = results.values().filter(|o| !o.success).count();
        info!(models = results.len(), failed, "migration run finished");
        results
    }

    fn create(&self, model: &dyn Model, identity: &str) -> MigrationOutcome {
        let mut outcome = self.creator.create_table(model);
        if !outcome.success {
            return outcome;
        }

        let schema = self.extractor.extract_from_model(model);
        if schema.is_empty() {
            outcome.fail("Schema extraction failed after creating the table; not recorded");
            return outcome;
        }

        if !self
            .recorder
            .record_migration(identity, &schema, true, &outcome.log)
        {
            outcome.fail("Failed to record migration");
        }
        outcome
    }

    fn migrate_existing(&self, model: &dyn Model, identity: &str, table: &str) -> MigrationOutcome {
        let current = self.extractor.extract_from_model(model);
        if current.is_empty() {
            return MigrationOutcome::failure(format!("Failed to extract schema for {identity}"));
        }

        let record = self.recorder.get_migration_record(identity);
        let previous = match &record {
            Some(record) if record.schema_hash == calculate_schema_hash(&current) => {
                debug!(model = identity, "schema unchanged");
                return MigrationOutcome::success(format!("Table {table} is up to date"));
            }
            Some(record) => record.schema(),
            None => None,
        };

        let Some(previous) = previous else {
            info!(model = identity, table, "recording schema of existing table");
            return self.record(
                identity,
                &current,
                MigrationOutcome::success(format!("Schema recorded for existing table {table}")),
            );
        };

        let changes = compare_schemas(&previous, &current);
        if changes.is_empty() {
            return self.record(
                identity,
                &current,
                MigrationOutcome::success(format!("No changes for table {table}")),
            );
        }

        let mut outcome = MigrationOutcome::success(String::new());
        for change in &changes {
            outcome.push_line(change.to_string());
        }

        let live = self.live_schema(table);
        match self.applier.apply(table, &changes, live.as_ref()) {
            Ok(notes) => {
                for note in notes {
                    outcome.push_line(note);
                }
                info!(model = identity, table, changes = changes.len(), "applied schema changes");
                self.record(identity, &current, outcome)
            }
            Err(e) => {
                error!(model = identity, table, "failed to apply schema changes: {e}");
                outcome.fail(format!("Migration failed: {e}"));
                // Keep the old fingerprint so the next run retries the diff.
                if !self
                    .recorder
                    .record_migration(identity, &previous, false, &outcome.log)
                {
                    outcome.push_line("Failed to record migration");
                }
                outcome
            }
        }
    }

    fn record(&self, identity: &str, schema: &Schema, mut outcome: MigrationOutcome) -> MigrationOutcome {
        if !self
            .recorder
            .record_migration(identity, schema, outcome.success, &outcome.log)
        {
            outcome.fail("Failed to record migration");
        }
        outcome
    }

    fn live_schema(&self, table: &str) -> Option<Schema> {
        match self.extractor.extract_from_table(table) {
            Ok(schema) => Some(schema),
            Err(e) => {
                debug!(table, "live schema unknown: {e}");
                None
            }
        }
    }
}
