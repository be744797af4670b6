use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a schemasync deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrator: MigratorConfig,
    pub log: LogConfig,
    pub models: Vec<ModelManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. `:memory:` opens a private in-memory database.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("schemasync.db"),
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Prepended to the tracking table name, one prefix per deployment.
    pub table_prefix: String,
    pub tracking_table: String,
    /// Upper bound on temp-table attempts when names collide.
    pub max_extract_attempts: u32,
    pub temp_table_prefix: String,
    /// Longest identifier the target database accepts.
    pub identifier_limit: usize,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            tracking_table: "schema_migrations".to_string(),
            max_extract_attempts: 3,
            temp_table_prefix: "tmp_".to_string(),
            identifier_limit: 64,
        }
    }
}

impl MigratorConfig {
    /// Fully prefixed name of the migration tracking table.
    pub fn tracking_table_name(&self) -> String {
        format!("{}{}", self.table_prefix, self.tracking_table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Declarative description of a data model, used in place of runtime
/// discovery when models come from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub identity: String,
    pub table: String,
    #[serde(default = "default_true")]
    pub incrementing: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub columns: Vec<ColumnManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    /// Allowed values for `enum` columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Column types a manifest may declare; each maps to one table-builder helper.
pub const MANIFEST_COLUMN_TYPES: &[&str] = &[
    "integer",
    "big_integer",
    "small_integer",
    "tiny_integer",
    "boolean",
    "string",
    "char",
    "text",
    "medium_text",
    "long_text",
    "float",
    "double",
    "decimal",
    "date",
    "date_time",
    "timestamp",
    "time",
    "year",
    "json",
    "binary",
    "enum",
];

fn default_true() -> bool {
    true
}
