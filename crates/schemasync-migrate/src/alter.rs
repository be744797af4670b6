//! Applying a diff to a live table.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemasync_common::{Error, Result};
use schemasync_db::{ColumnKind, ColumnSpec, Database};
use tracing::{debug, info, warn};

use crate::comparator::normalize_type;
use crate::defaults::generate_non_null_value;
use crate::schema::{ColumnDefinition, Schema, SchemaChange, SchemaChangeKind};

/// Facet precedence when several changes on one column each carry a target.
const FACET_PRECEDENCE: [SchemaChangeKind; 4] = [
    SchemaChangeKind::TypeChanged,
    SchemaChangeKind::NullabilityChanged,
    SchemaChangeKind::DefaultChanged,
    SchemaChangeKind::UniqueChanged,
];

/// Table-builder column for a definition, keyed by its normalised type.
///
/// Unrecognised types become `VARCHAR(255)` columns with a warning.
pub fn column_spec_for(definition: &ColumnDefinition) -> ColumnSpec {
    let column_type = normalize_type(&definition.column_type).to_lowercase();

    let kind = match column_type.as_str() {
        "integer" if definition.autoincrement && definition.primary => ColumnKind::Increments,
        "integer" => ColumnKind::Integer,
        "bigint" => ColumnKind::BigInteger,
        "tinyint" if definition.length == Some(1) => ColumnKind::Boolean,
        "tinyint" | "smallint" => ColumnKind::SmallInteger,
        "boolean" => ColumnKind::Boolean,
        "varchar" | "string" => ColumnKind::String {
            length: definition.length.unwrap_or(255),
        },
        "char" => ColumnKind::Char {
            length: definition.length.unwrap_or(255),
        },
        "text" => ColumnKind::Text,
        "mediumtext" => ColumnKind::MediumText,
        "longtext" => ColumnKind::LongText,
        "float" => ColumnKind::Float,
        "double" => ColumnKind::Double,
        "decimal" => ColumnKind::Decimal {
            precision: definition.precision.unwrap_or(8),
            scale: definition.scale.unwrap_or(2),
        },
        "date" => ColumnKind::Date,
        "datetime" => ColumnKind::DateTime,
        "timestamp" => ColumnKind::Timestamp,
        "time" => ColumnKind::Time,
        "year" => ColumnKind::Year,
        "json" => ColumnKind::Json,
        "blob" | "binary" => ColumnKind::Binary,
        "enum" | "set" => ColumnKind::Enum {
            values: definition.allowed.clone().unwrap_or_default(),
        },
        other => {
            warn!(
                column = %definition.name,
                column_type = other,
                "unrecognised column type, falling back to string"
            );
            ColumnKind::String { length: 255 }
        }
    };

    let mut spec = ColumnSpec::new(&definition.name, kind);
    if definition.nullable {
        spec.nullable();
    }
    if !definition.default.is_null() {
        spec.default(definition.default.clone());
    }
    if definition.unique {
        spec.unique();
    }
    spec
}

/// Issues the DDL for a list of [`SchemaChange`]s.
pub struct AlterApplier {
    db: Arc<dyn Database>,
}

impl AlterApplier {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Apply `changes` to `table`, one column at a time.
    ///
    /// `live`, when known, lets drops that already happened be skipped and
    /// turns an add of a column that already exists into a reconciliation of
    /// its unique and nullable facets. Columns the driver cannot alter in
    /// place are skipped with a warning. Returns notes for the migration log;
    /// the first database error aborts the batch.
    pub fn apply(
        &self,
        table: &str,
        changes: &[SchemaChange],
        live: Option<&Schema>,
    ) -> Result<Vec<String>> {
        let mut grouped: BTreeMap<&str, Vec<&SchemaChange>> = BTreeMap::new();
        for change in changes {
            grouped
                .entry(change.column_name.as_str())
                .or_default()
                .push(change);
        }

        let mut notes = Vec::new();
        for (column, group) in grouped {
            let has = |kind| group.iter().any(|c| c.kind == kind);
            let existing = live.and_then(|live| live.get(column));

            if has(SchemaChangeKind::ColumnRemoved) {
                if live.is_some() && existing.is_none() {
                    notes.push(format!("Column '{column}' already absent, skipped"));
                    continue;
                }
                self.db.drop_column(table, column)?;
                info!(table, column, "dropped column");
            } else if has(SchemaChangeKind::ColumnAdded) {
                let Some(definition) = group.iter().find_map(|c| c.new_definition.as_ref()) else {
                    continue;
                };
                match existing {
                    Some(current) => notes.extend(self.reconcile(table, current, definition)?),
                    None => self.add_column(table, definition)?,
                }
            } else if let Some(definition) = representative(&group) {
                if let Some(note) = self.modify_column(table, definition)? {
                    notes.push(note);
                }
            }
        }

        Ok(notes)
    }

    fn add_column(&self, table: &str, definition: &ColumnDefinition) -> Result<()> {
        let mut spec = column_spec_for(definition);
        if !definition.nullable && definition.default.is_null() {
            let backfill = generate_non_null_value(&definition.column_type, definition);
            if !backfill.is_null() {
                debug!(table, column = %definition.name, %backfill, "backfilling new NOT NULL column");
                spec.default(backfill);
            }
        }
        self.db.add_column(table, &spec)?;
        info!(table, column = %definition.name, "added column");
        Ok(())
    }

    /// Bring a column that is already live in line with the definition it
    /// was meant to be added with.
    fn reconcile(
        &self,
        table: &str,
        current: &ColumnDefinition,
        target: &ColumnDefinition,
    ) -> Result<Option<String>> {
        let column = &target.name;
        if current.nullable != target.nullable {
            return self.modify_column(table, target);
        }
        if target.unique && !current.unique {
            self.db.add_unique_index(table, column)?;
            info!(table, column = %column, "added missing unique index");
            return Ok(Some(format!(
                "Column '{column}' already present, unique index added"
            )));
        }
        Ok(Some(format!("Column '{column}' already present, skipped")))
    }

    fn modify_column(&self, table: &str, definition: &ColumnDefinition) -> Result<Option<String>> {
        let column = &definition.name;
        if !self.db.supports_column_alteration() {
            warn!(
                table,
                column = %column,
                driver = self.db.driver_name(),
                "driver cannot alter columns in place, skipping"
            );
            return Ok(Some(format!(
                "Column '{column}' alteration skipped: {} cannot alter columns in place",
                self.db.driver_name()
            )));
        }

        match self.db.modify_column(table, &column_spec_for(definition)) {
            Ok(()) => {
                info!(table, column = %column, "altered column");
                Ok(None)
            }
            Err(Error::Unsupported(reason)) => {
                warn!(table, column = %column, "column alteration unsupported: {reason}");
                Ok(Some(format!("Column '{column}' alteration skipped: {reason}")))
            }
            Err(e) => Err(e),
        }
    }
}

/// The target definition of a column whose facets changed, picked by
/// [`FACET_PRECEDENCE`]. Every facet change carries the full target shape.
fn representative<'a>(group: &[&'a SchemaChange]) -> Option<&'a ColumnDefinition> {
    FACET_PRECEDENCE.iter().find_map(|kind| {
        group
            .iter()
            .find(|c| c.kind == *kind)
            .and_then(|c| c.new_definition.as_ref())
    })
}
