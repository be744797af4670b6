//! Declarative table builder.
//!
//! A [`Blueprint`] collects abstract column declarations. Backends decide how
//! each [`ColumnKind`] materialises into a native column type.

use serde_json::Value;

/// Abstract column type as declared by a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    /// Auto-incrementing integer primary key.
    Increments,
    Integer,
    BigInteger,
    SmallInteger,
    TinyInteger,
    Boolean,
    String { length: u32 },
    Char { length: u32 },
    Text,
    MediumText,
    LongText,
    Float,
    Double,
    Decimal { precision: u32, scale: u32 },
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Json,
    Binary,
    Enum { values: Vec<String> },
}

/// One column declaration plus its modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub default: Option<Value>,
    pub unique: bool,
    pub primary: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        let primary = matches!(kind, ColumnKind::Increments);
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            unique: false,
            primary,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    /// Set the column default. `Value::Null` clears it.
    pub fn default(&mut self, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.default = if value.is_null() { None } else { Some(value) };
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self
    }
}

/// Ordered list of column declarations for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    table: String,
    columns: Vec<ColumnSpec>,
}

impl Blueprint {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Append a column. Redeclaring a name replaces the earlier declaration
    /// in place.
    pub fn column(&mut self, name: impl Into<String>, kind: ColumnKind) -> &mut ColumnSpec {
        let spec = ColumnSpec::new(name, kind);
        let idx = match self.columns.iter().position(|c| c.name == spec.name) {
            Some(idx) => {
                self.columns[idx] = spec;
                idx
            }
            None => {
                self.columns.push(spec);
                self.columns.len() - 1
            }
        };
        &mut self.columns[idx]
    }

    pub fn increments(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Increments)
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::BigInteger)
    }

    pub fn small_integer(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::SmallInteger)
    }

    pub fn tiny_integer(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::TinyInteger)
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Boolean)
    }

    pub fn string(&mut self, name: &str, length: u32) -> &mut ColumnSpec {
        self.column(name, ColumnKind::String { length })
    }

    pub fn char(&mut self, name: &str, length: u32) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Char { length })
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Text)
    }

    pub fn medium_text(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::MediumText)
    }

    pub fn long_text(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::LongText)
    }

    pub fn float(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Float)
    }

    pub fn double(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Double)
    }

    pub fn decimal(&mut self, name: &str, precision: u32, scale: u32) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Decimal { precision, scale })
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Date)
    }

    pub fn date_time(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::DateTime)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Timestamp)
    }

    pub fn time(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Time)
    }

    pub fn year(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Year)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Json)
    }

    pub fn binary(&mut self, name: &str) -> &mut ColumnSpec {
        self.column(name, ColumnKind::Binary)
    }

    pub fn enumeration(&mut self, name: &str, values: &[&str]) -> &mut ColumnSpec {
        let values = values.iter().map(|v| v.to_string()).collect();
        self.column(name, ColumnKind::Enum { values })
    }

    /// Nullable `created_at` and `updated_at` timestamp columns.
    pub fn timestamps(&mut self) {
        self.timestamp("created_at").nullable();
        self.timestamp("updated_at").nullable();
    }
}
