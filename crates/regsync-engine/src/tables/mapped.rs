//! Statically described tables with explicit column projection.

use regsync_types::cursor::CursorKind;
use regsync_types::error::TransformError;
use regsync_types::record::{CanonicalRecord, FieldValue, RawRow};
use regsync_types::schema::{ColumnSpec, DestinationTable, SqlType};
use regsync_types::state::TableName;

use super::{TableHandler, SOURCE_TIMESTAMP_COLUMN};
use crate::transform::{self, Coercion};

/// One source field, named in `camelCase`.
///
/// The source column is the upper-cased name; the destination column is
/// its `lower_snake` form.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub coercion: Coercion,
    pub sql_type: SqlType,
}

impl FieldSpec {
    #[must_use]
    pub const fn text(name: &'static str, max_len: u32) -> Self {
        Self {
            name,
            coercion: Coercion::Text,
            sql_type: SqlType::Varchar(max_len),
        }
    }

    #[must_use]
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            coercion: Coercion::Integer,
            sql_type: SqlType::Integer,
        }
    }

    #[must_use]
    pub const fn money(name: &'static str) -> Self {
        Self {
            name,
            coercion: Coercion::Float,
            sql_type: SqlType::Numeric,
        }
    }

    #[must_use]
    pub const fn report_date(name: &'static str) -> Self {
        Self {
            name,
            coercion: Coercion::ReportDate,
            sql_type: SqlType::Timestamp,
        }
    }

    #[must_use]
    pub const fn flag(name: &'static str) -> Self {
        Self {
            name,
            coercion: Coercion::Flag,
            sql_type: SqlType::Boolean,
        }
    }
}

/// Static description of a table.
#[derive(Debug)]
pub struct TableSpec {
    /// Source table name.
    pub source: &'static str,
    /// Destination table name.
    pub destination: &'static str,
    /// Source column (`camelCase`) that orders and filters the fetch. It is
    /// projected even when it is not one of `fields`.
    pub ordering: &'static str,
    pub cursor_kind: CursorKind,
    pub fields: &'static [FieldSpec],
    /// Natural key fields (besides `endpoint_id`).
    pub natural_key: &'static [&'static str],
    /// Fields that must be non-empty after coercion.
    pub required: &'static [&'static str],
    /// Fields given a secondary index in the destination.
    pub indexed: &'static [&'static str],
}

#[derive(Debug, Clone)]
struct MappedColumn {
    source: String,
    destination: String,
    coercion: Coercion,
}

/// [`TableHandler`] built from a [`TableSpec`].
#[derive(Debug, Clone)]
pub struct MappedTable {
    name: TableName,
    ordering_column: String,
    cursor_kind: CursorKind,
    columns: Vec<MappedColumn>,
    projection: Vec<String>,
    required: Vec<String>,
    destination: DestinationTable,
}

impl MappedTable {
    #[must_use]
    pub fn from_spec(spec: &TableSpec) -> Self {
        let required: Vec<String> = spec.required.iter().map(|f| transform::snake_case(f)).collect();
        let columns: Vec<MappedColumn> = spec
            .fields
            .iter()
            .map(|f| MappedColumn {
                source: f.name.to_ascii_uppercase(),
                destination: transform::snake_case(f.name),
                coercion: f.coercion,
            })
            .collect();

        let mut dest_columns: Vec<ColumnSpec> = spec
            .fields
            .iter()
            .zip(&columns)
            .map(|(f, c)| {
                let col = ColumnSpec::new(c.destination.clone(), f.sql_type);
                if required.contains(&c.destination) {
                    col.not_null()
                } else {
                    col
                }
            })
            .collect();
        dest_columns.push(ColumnSpec::new(SOURCE_TIMESTAMP_COLUMN, SqlType::Varchar(32)));

        let ordering_column = spec.ordering.to_ascii_uppercase();
        let mut projection: Vec<String> = columns.iter().map(|c| c.source.clone()).collect();
        if !projection.contains(&ordering_column) {
            projection.push(ordering_column.clone());
        }

        Self {
            name: TableName::new(spec.source),
            ordering_column,
            cursor_kind: spec.cursor_kind,
            columns,
            projection,
            required,
            destination: DestinationTable {
                name: spec.destination.to_string(),
                columns: dest_columns,
                natural_key: spec
                    .natural_key
                    .iter()
                    .map(|f| transform::snake_case(f))
                    .collect(),
                indexed: spec.indexed.iter().map(|f| transform::snake_case(f)).collect(),
            },
        }
    }
}

fn is_blank(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

impl TableHandler for MappedTable {
    fn name(&self) -> &TableName {
        &self.name
    }

    fn ordering_column(&self) -> &str {
        &self.ordering_column
    }

    fn cursor_kind(&self) -> CursorKind {
        self.cursor_kind
    }

    fn projection(&self) -> Option<Vec<&str>> {
        Some(self.projection.iter().map(String::as_str).collect())
    }

    fn destination(&self) -> &DestinationTable {
        &self.destination
    }

    fn transform(&self, row: &RawRow) -> Result<CanonicalRecord, TransformError> {
        let ordering_raw = row.get(&self.ordering_column);
        let ordering = ordering_raw
            .and_then(|v| v.to_cursor(self.cursor_kind))
            .ok_or_else(|| TransformError::BadOrdering {
                table: self.name.to_string(),
                column: self.ordering_column.clone(),
                kind: self.cursor_kind,
            })?;

        let mut record = CanonicalRecord::new(self.name.clone(), ordering);
        for col in &self.columns {
            record.set(
                col.destination.clone(),
                transform::coerce(col.coercion, row.get(&col.source)),
            );
        }
        record.set(SOURCE_TIMESTAMP_COLUMN, transform::text(ordering_raw));

        if let Some(field) = self.required.iter().find(|f| is_blank(record.get(f))) {
            return Err(TransformError::MissingField {
                table: self.name.to_string(),
                field: field.clone(),
            });
        }
        Ok(record)
    }
}
