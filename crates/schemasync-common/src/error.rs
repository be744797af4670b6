use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("table already exists: {0}")]
    DuplicateTable(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("schema extraction error: {0}")]
    Extraction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Driver messages and SQLSTATE/vendor codes that signal a table name collision.
const DUPLICATE_TABLE_MARKERS: &[&str] = &["already exists", "1050", "42s01", "42p07"];

impl Error {
    /// Whether this error was caused by creating a table whose name is taken.
    ///
    /// Backends that classify the failure themselves return
    /// [`Error::DuplicateTable`]; for the rest the driver message is inspected.
    pub fn is_duplicate_table(&self) -> bool {
        match self {
            Error::DuplicateTable(_) => true,
            Error::Database(msg) => {
                let lower = msg.to_lowercase();
                DUPLICATE_TABLE_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}
