use std::collections::HashSet;
use std::path::{Path, PathBuf};

use schemasync_common::{Error, Result};
use tracing::{debug, info};

use crate::model::{AppConfig, MANIFEST_COLUMN_TYPES};

/// Environment variable that overrides `database.path`.
pub const DATABASE_ENV: &str = "SCHEMASYNC_DATABASE";

/// Loads `AppConfig` from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Default config location: `<config dir>/schemasync/config.yml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("schemasync")
            .join("config.yml")
    }

    /// Load the config at `path`, falling back to defaults when the file does
    /// not exist. Environment overrides are applied and the result validated.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let mut config = if path.exists() {
            info!("loading config from {}", path.display());
            Self::parse_file(path)?
        } else {
            debug!("no config at {}, using defaults", path.display());
            AppConfig::default()
        };

        if let Ok(db_path) = std::env::var(DATABASE_ENV)
            && !db_path.is_empty()
        {
            config.database.path = PathBuf::from(db_path);
        }

        Self::validate(&config)?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Reject manifests the engine cannot turn into a table definition.
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.migrator.max_extract_attempts == 0 {
            return Err(Error::Config(
                "migrator.max_extract_attempts must be at least 1".into(),
            ));
        }

        for model in &config.models {
            if model.identity.trim().is_empty() {
                return Err(Error::Config("model identity cannot be empty".into()));
            }
            if model.table.trim().is_empty() {
                return Err(Error::Config(format!(
                    "model {} has an empty table name",
                    model.identity
                )));
            }

            let mut seen = HashSet::new();
            for column in &model.columns {
                if !seen.insert(column.name.as_str()) {
                    return Err(Error::Config(format!(
                        "model {} declares column '{}' twice",
                        model.identity, column.name
                    )));
                }
                if !MANIFEST_COLUMN_TYPES.contains(&column.column_type.as_str()) {
                    return Err(Error::Config(format!(
                        "model {} column '{}' has unknown type '{}'",
                        model.identity, column.name, column.column_type
                    )));
                }
            }
        }

        Ok(())
    }
}
