//! Runtime schema migration engine.
//!
//! Each model's intended layout is learned by materialising it as a
//! throwaway table ([`SchemaExtractor`]), diffed against the last recorded
//! layout ([`compare_schemas`]) and applied to the live table
//! ([`SchemaMigrator`]). Applied layouts are fingerprinted in a tracking
//! table ([`MigrationRecorder`]).

pub mod alter;
pub mod comparator;
pub mod creator;
pub mod defaults;
pub mod extractor;
pub mod migrator;
pub mod model;
pub mod outcome;
pub mod recorder;
pub mod registry;
pub mod schema;

pub use alter::{AlterApplier, column_spec_for};
pub use comparator::{compare_schemas, has_default_changed, has_type_changed, normalize_type};
pub use creator::TableCreator;
pub use defaults::{TypeFamily, generate_default, generate_non_null_value, safe_cast_value};
pub use extractor::SchemaExtractor;
pub use migrator::SchemaMigrator;
pub use model::{Model, ModelDescriptor, blueprint_for};
pub use outcome::MigrationOutcome;
pub use recorder::{MigrationRecord, MigrationRecorder, calculate_schema_hash};
pub use registry::TempTableRegistry;
pub use schema::{ColumnDefinition, Schema, SchemaChange, SchemaChangeKind};
