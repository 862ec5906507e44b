//! Multi-row upsert statement and typed parameters.

use std::fmt::Write as _;

use chrono::NaiveDateTime;
use pg_escape::quote_identifier;
use regsync_types::record::{CanonicalRecord, FieldValue};
use regsync_types::schema::{ColumnSpec, DestinationTable, SqlType};
use regsync_types::timefmt;
use tokio_postgres::types::ToSql;

/// Wire protocol limit on bind parameters per statement.
pub const MAX_PARAMS: usize = u16::MAX as usize;

/// Placeholder suffix for columns whose parameter type differs from the
/// column type. `DECIMAL` and `NUMERIC` values travel as `float8` and are
/// cast on assignment.
fn placeholder_cast(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Decimal(..) | SqlType::Numeric => "::float8",
        _ => "",
    }
}

/// `ON CONFLICT` clause: every non-key column takes the incoming value and
/// `updated_at` is refreshed.
pub(crate) fn build_upsert_clause(table: &DestinationTable) -> String {
    let key = std::iter::once("endpoint_id".into())
        .chain(table.natural_key.iter().map(|k| quote_identifier(k)))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = table
        .mutable_columns()
        .map(|c| {
            let col = quote_identifier(&c.name);
            format!("{col} = EXCLUDED.{col}")
        })
        .chain(std::iter::once("updated_at = now()".to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(" ON CONFLICT ({key}) DO UPDATE SET {updates}")
}

/// `INSERT ... VALUES (...), ... ON CONFLICT ...` for `rows` records.
#[must_use]
pub fn upsert_sql(table: &DestinationTable, rows: usize) -> String {
    let col_list = std::iter::once("endpoint_id".into())
        .chain(table.columns.iter().map(|c| quote_identifier(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let width = table.columns.len() + 1;

    let header = format!(
        "INSERT INTO {} ({col_list}) VALUES ",
        quote_identifier(&table.name)
    );
    let mut sql = String::with_capacity(header.len() + rows * width * 6 + 128);
    sql.push_str(&header);

    let mut n = 0usize;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        n += 1;
        let _ = write!(sql, "(${n}");
        for col in &table.columns {
            n += 1;
            let _ = write!(sql, ", ${n}{}", placeholder_cast(col.sql_type));
        }
        sql.push(')');
    }
    sql.push_str(&build_upsert_clause(table));
    sql
}

/// One bound value, typed for its destination column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float8(Option<f64>),
    Bool(Option<bool>),
    Text(Option<String>),
    Timestamp(Option<NaiveDateTime>),
    Json(Option<serde_json::Value>),
}

impl SqlParam {
    /// Convert `value` for `column`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the column when the value cannot be
    /// represented in the column type.
    pub fn for_column(column: &ColumnSpec, value: &FieldValue) -> Result<Self, String> {
        let mismatch = || format!("column {}: cannot store {value:?}", column.name);
        Ok(match column.sql_type {
            SqlType::Integer => Self::Int4(
                as_int(value)
                    .ok_or_else(mismatch)?
                    .map(|v| {
                        i32::try_from(v)
                            .map_err(|_| format!("column {}: {v} out of INTEGER range", column.name))
                    })
                    .transpose()?,
            ),
            SqlType::BigInt => Self::Int8(as_int(value).ok_or_else(mismatch)?),
            SqlType::Double | SqlType::Decimal(..) | SqlType::Numeric => {
                Self::Float8(as_float(value).ok_or_else(mismatch)?)
            }
            SqlType::Boolean => Self::Bool(match value {
                FieldValue::Null => None,
                FieldValue::Bool(b) => Some(*b),
                _ => return Err(mismatch()),
            }),
            SqlType::Varchar(_) | SqlType::Text => Self::Text(as_text(value)),
            SqlType::Timestamp => Self::Timestamp(match value {
                FieldValue::Null => None,
                FieldValue::Timestamp(ts) => Some(*ts),
                FieldValue::Text(s) => Some(timefmt::parse_any(s).ok_or_else(mismatch)?),
                _ => return Err(mismatch()),
            }),
            SqlType::Jsonb => Self::Json(match value {
                FieldValue::Null => None,
                FieldValue::Json(v) => Some(v.clone()),
                other => as_text(other).map(serde_json::Value::String),
            }),
        })
    }

    pub(crate) fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int4(v) => v,
            Self::Int8(v) => v,
            Self::Float8(v) => v,
            Self::Bool(v) => v,
            Self::Text(v) => v,
            Self::Timestamp(v) => v,
            Self::Json(v) => v,
        }
    }
}

/// Parameters for [`upsert_sql`], row-major, `endpoint_id` first in each
/// row.
///
/// # Errors
///
/// Returns the first conversion failure.
pub fn build_params(
    endpoint: &str,
    table: &DestinationTable,
    records: &[CanonicalRecord],
) -> Result<Vec<SqlParam>, String> {
    let mut params = Vec::with_capacity(records.len() * (table.columns.len() + 1));
    for record in records {
        params.push(SqlParam::Text(Some(endpoint.to_string())));
        for col in &table.columns {
            params.push(SqlParam::for_column(col, record.get(&col.name))?);
        }
    }
    Ok(params)
}

/// `None` = SQL `NULL`; outer `None` = not an integer.
#[allow(clippy::cast_possible_truncation, clippy::option_option)]
fn as_int(value: &FieldValue) -> Option<Option<i64>> {
    match value {
        FieldValue::Null => Some(None),
        FieldValue::Int(v) => Some(Some(*v)),
        FieldValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(Some(*f as i64)),
        FieldValue::Text(s) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss, clippy::option_option)]
fn as_float(value: &FieldValue) -> Option<Option<f64>> {
    match value {
        FieldValue::Null => Some(None),
        FieldValue::Float(f) => Some(Some(*f)),
        FieldValue::Int(v) => Some(Some(*v as f64)),
        FieldValue::Text(s) => s.trim().parse().ok().map(Some),
        _ => None,
    }
}

fn as_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Int(v) => Some(v.to_string()),
        FieldValue::Float(v) => Some(v.to_string()),
        FieldValue::Bool(v) => Some(v.to_string()),
        FieldValue::Timestamp(ts) => Some(timefmt::format_db2(ts)),
        FieldValue::Json(v) => Some(v.to_string()),
    }
}
