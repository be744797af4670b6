use std::sync::Arc;

use anyhow::{Context, Result, bail};
use schemasync_config::AppConfig;
use schemasync_db::{Database, SqliteDatabase};
use schemasync_migrate::{Model, ModelDescriptor, SchemaMigrator, calculate_schema_hash};
use tracing::info;

/// Configured models bound to an open database.
pub struct App {
    migrator: SchemaMigrator,
    models: Vec<Box<dyn Model>>,
}

impl App {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let db: Arc<dyn Database> = if config.database.is_in_memory() {
            Arc::new(SqliteDatabase::in_memory().context("failed to open in-memory database")?)
        } else {
            let path = &config.database.path;
            Arc::new(
                SqliteDatabase::open(path)
                    .with_context(|| format!("failed to open database {}", path.display()))?,
            )
        };

        let models: Vec<Box<dyn Model>> = config
            .models
            .iter()
            .map(|manifest| Box::new(ModelDescriptor::from_manifest(manifest)) as Box<dyn Model>)
            .collect();
        info!(models = models.len(), "loaded model manifests");

        Ok(Self {
            migrator: SchemaMigrator::from_config(db, &config.migrator),
            models,
        })
    }

    fn model(&self, identity: &str) -> Result<&dyn Model> {
        self.models
            .iter()
            .map(|model| &**model)
            .find(|model| model.identity() == identity)
            .with_context(|| format!("no model with identity {identity}"))
    }

    /// One line per model: identity, table and whether it needs migrating.
    pub fn status(&self) -> String {
        if self.models.is_empty() {
            return "no models configured\n".to_string();
        }

        let pending = self.migrator.get_models_needing_migration(&self.models);
        let mut out = String::new();
        for model in &self.models {
            let identity = model.identity();
            let state = if pending.contains_key(&identity) {
                "pending"
            } else {
                "up to date"
            };
            out.push_str(&format!("{identity}\t{}\t{state}\n", model.table()));
        }
        out
    }

    /// Migrate every model. The flag is false when any model failed.
    pub fn migrate(&self) -> (String, bool) {
        let results = self.migrator.migrate_all(&self.models);
        let ok = results.values().all(|outcome| outcome.success);
        let out = results
            .iter()
            .map(|(identity, outcome)| format!("{identity}: {outcome}\n"))
            .collect();
        (out, ok)
    }

    /// The stored migration record of `identity` as pretty JSON.
    pub fn show(&self, identity: &str) -> Result<String> {
        let record = self
            .migrator
            .recorder()
            .get_migration_record(identity)
            .with_context(|| format!("no migration record for {identity}"))?;
        Ok(serde_json::to_string_pretty(&record)?)
    }

    /// The freshly extracted schema of `identity` followed by its hash.
    pub fn hash(&self, identity: &str) -> Result<String> {
        let model = self.model(identity)?;
        let schema = self.migrator.extractor().extract_from_model(model);
        if schema.is_empty() {
            bail!("schema extraction failed for {identity}");
        }
        Ok(format!(
            "{}\n{}",
            serde_json::to_string_pretty(&schema)?,
            calculate_schema_hash(&schema)
        ))
    }
}
