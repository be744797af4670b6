pub mod blueprint;
pub mod database;
pub mod sqlite;

pub use blueprint::{Blueprint, ColumnKind, ColumnSpec};
pub use database::{
    CatalogQueries, ColumnMetadata, Database, IndexInfo, Row, is_current_timestamp, render_default,
    split_declared_type,
};
pub use sqlite::{Capabilities, SqliteDatabase};
