//! Destination table descriptors.
//!
//! Every destination table carries an `endpoint_id` column plus the
//! columns described here. The upsert conflict target is
//! `(endpoint_id, natural_key...)`.

use serde::{Deserialize, Serialize};

/// Logical column type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    /// Bounded text (`VARCHAR(n)`).
    Varchar(u32),
    Text,
    Integer,
    BigInt,
    Double,
    /// Fixed-point numeric with (precision, scale).
    Decimal(u8, u8),
    /// Unconstrained `NUMERIC`.
    Numeric,
    Timestamp,
    Boolean,
    Jsonb,
}

/// One destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Shape of one destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationTable {
    pub name: String,
    /// Data columns in insert order (excludes `endpoint_id` and bookkeeping columns).
    pub columns: Vec<ColumnSpec>,
    /// Natural key columns (excluding `endpoint_id`).
    pub natural_key: Vec<String>,
    /// Columns that get a secondary index next to `endpoint_id`.
    #[serde(default)]
    pub indexed: Vec<String>,
}

impl DestinationTable {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns rewritten on conflict: every data column outside the natural key.
    pub fn mutable_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| !self.natural_key.iter().any(|k| k == &c.name))
    }

    #[must_use]
    pub fn is_key(&self, column: &str) -> bool {
        self.natural_key.iter().any(|k| k == column)
    }
}
