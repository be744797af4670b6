//! Model descriptors consumed by the engine.

use std::fmt;
use std::sync::Arc;

use schemasync_config::{ColumnManifest, ModelManifest};
use schemasync_db::Blueprint;

/// A data model whose table the engine keeps in sync.
pub trait Model: Send + Sync {
    /// Unique key for the model, typically its fully-qualified type name.
    fn identity(&self) -> String;

    fn table(&self) -> String;

    /// Whether the table gets an auto-incrementing `id` primary key.
    fn incrementing(&self) -> bool {
        true
    }

    /// Whether the table gets `created_at`/`updated_at` columns.
    fn timestamps(&self) -> bool {
        true
    }

    /// Append the model's own columns.
    fn define_schema(&self, table: &mut Blueprint);

    /// Last path segment of the identity, e.g. `User` for `app::models::User`.
    fn short_name(&self) -> String {
        let identity = self.identity();
        identity
            .rsplit(|c: char| c == ':' || c == '\\' || c == '.')
            .find(|s| !s.is_empty())
            .unwrap_or(&identity)
            .to_string()
    }
}

/// Build the table exactly as the engine materialises it for `model`:
/// `id` first when incrementing, then the model's columns, then timestamps.
pub fn blueprint_for(model: &dyn Model, table: &str) -> Blueprint {
    let mut blueprint = Blueprint::new(table);
    if model.incrementing() {
        blueprint.increments("id");
    }
    model.define_schema(&mut blueprint);
    if model.timestamps() {
        blueprint.timestamps();
    }
    blueprint
}

type SchemaFn = Arc<dyn Fn(&mut Blueprint) + Send + Sync>;

/// A [`Model`] assembled from plain values and a schema callback.
#[derive(Clone)]
pub struct ModelDescriptor {
    identity: String,
    table: String,
    incrementing: bool,
    timestamps: bool,
    schema: SchemaFn,
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("identity", &self.identity)
            .field("table", &self.table)
            .field("incrementing", &self.incrementing)
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

impl ModelDescriptor {
    pub fn new(
        identity: impl Into<String>,
        table: impl Into<String>,
        schema: impl Fn(&mut Blueprint) + Send + Sync + 'static,
    ) -> Self {
        Self {
            identity: identity.into(),
            table: table.into(),
            incrementing: true,
            timestamps: true,
            schema: Arc::new(schema),
        }
    }

    /// Descriptor whose identity is the type name of `T`.
    pub fn of<T: ?Sized>(
        table: impl Into<String>,
        schema: impl Fn(&mut Blueprint) + Send + Sync + 'static,
    ) -> Self {
        Self::new(std::any::type_name::<T>(), table, schema)
    }

    pub fn with_incrementing(mut self, incrementing: bool) -> Self {
        self.incrementing = incrementing;
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Descriptor that replays the columns declared in a config manifest.
    pub fn from_manifest(manifest: &ModelManifest) -> Self {
        let columns = manifest.columns.clone();
        Self::new(&manifest.identity, &manifest.table, move |table| {
            for column in &columns {
                declare_column(table, column);
            }
        })
        .with_incrementing(manifest.incrementing)
        .with_timestamps(manifest.timestamps)
    }
}

fn declare_column(table: &mut Blueprint, column: &ColumnManifest) {
    let name = column.name.as_str();
    let spec = match column.column_type.as_str() {
        "integer" => table.integer(name),
        "big_integer" => table.big_integer(name),
        "small_integer" => table.small_integer(name),
        "tiny_integer" => table.tiny_integer(name),
        "boolean" => table.boolean(name),
        "char" => table.char(name, column.length.unwrap_or(255)),
        "text" => table.text(name),
        "medium_text" => table.medium_text(name),
        "long_text" => table.long_text(name),
        "float" => table.float(name),
        "double" => table.double(name),
        "decimal" => table.decimal(
            name,
            column.precision.unwrap_or(8),
            column.scale.unwrap_or(2),
        ),
        "date" => table.date(name),
        "date_time" => table.date_time(name),
        "timestamp" => table.timestamp(name),
        "time" => table.time(name),
        "year" => table.year(name),
        "json" => table.json(name),
        "binary" => table.binary(name),
        "enum" => {
            let values: Vec<&str> = column.values.iter().map(String::as_str).collect();
            table.enumeration(name, &values)
        }
        // "string" and anything validation let through
        _ => table.string(name, column.length.unwrap_or(255)),
    };

    if column.nullable {
        spec.nullable();
    }
    if let Some(default) = &column.default {
        spec.default(default.clone());
    }
    if column.unique {
        spec.unique();
    }
}

impl Model for ModelDescriptor {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn table(&self) -> String {
        self.table.clone()
    }

    fn incrementing(&self) -> bool {
        self.incrementing
    }

    fn timestamps(&self) -> bool {
        self.timestamps
    }

    fn define_schema(&self, table: &mut Blueprint) {
        (self.schema)(table);
    }
}
