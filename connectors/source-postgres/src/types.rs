//! `PostgreSQL` type handling: row decoding and cursor parameter binding.
//!
//! Types are matched by name, the same way for decoding, text casting and
//! binding.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use pg_escape::quote_identifier;
use postgres::types::{FromSql, ToSql, Type};
use postgres::Row;
use regsync_types::connector::SourceQuery;
use regsync_types::cursor::CursorValue;
use regsync_types::record::{RawRow, RawValue, RowEvent};

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one result row. A column that fails to decode turns the whole
/// row into [`RowEvent::Undecodable`].
#[must_use]
pub fn decode_row(row: &Row, position: usize) -> RowEvent {
    let mut raw = RawRow::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        match decode_value(row, idx, column.type_()) {
            Ok(value) => raw.push(column.name(), value),
            Err(reason) => {
                return RowEvent::Undecodable {
                    position,
                    reason: format!("column {}: {reason}", column.name()),
                }
            }
        }
    }
    RowEvent::Row(raw)
}

fn decode_value(row: &Row, idx: usize, ty: &Type) -> Result<RawValue, String> {
    fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match ty.name() {
        "bool" => get::<bool>(row, idx)?.map(RawValue::Bool),
        "int2" => get::<i16>(row, idx)?.map(|v| RawValue::Int(i64::from(v))),
        "int4" => get::<i32>(row, idx)?.map(|v| RawValue::Int(i64::from(v))),
        "int8" => get::<i64>(row, idx)?.map(RawValue::Int),
        "float4" => get::<f32>(row, idx)?.map(|v| RawValue::Float(f64::from(v))),
        "float8" => get::<f64>(row, idx)?.map(RawValue::Float),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, idx)?.map(RawValue::Text),
        "timestamp" => get::<NaiveDateTime>(row, idx)?.map(RawValue::Timestamp),
        "timestamptz" => {
            get::<DateTime<Utc>>(row, idx)?.map(|ts| RawValue::Timestamp(ts.naive_utc()))
        }
        "date" => get::<NaiveDate>(row, idx)?
            .map(|d| RawValue::Timestamp(NaiveDateTime::new(d, NaiveTime::MIN))),
        "json" | "jsonb" => {
            get::<serde_json::Value>(row, idx)?.map(|v| RawValue::Text(v.to_string()))
        }
        other => return Err(format!("unsupported type {other}")),
    };
    Ok(value.unwrap_or(RawValue::Null))
}

/// Types [`decode_value`] reads natively. Everything else is cast to text
/// by the server.
fn has_native_decoder(ty: &Type) -> bool {
    matches!(
        ty.name(),
        "bool"
            | "int2"
            | "int4"
            | "int8"
            | "float4"
            | "float8"
            | "text"
            | "varchar"
            | "bpchar"
            | "name"
            | "timestamp"
            | "timestamptz"
            | "date"
            | "json"
            | "jsonb"
    )
}

/// Rewrite `query` so every column without a native decoder arrives as
/// `col::text`. `columns` is the result description of the prepared
/// statement. Returns `None` when no column needs a cast.
///
/// The page query becomes a subselect; ordering is reapplied on the
/// uncast ordering column.
#[must_use]
pub fn text_cast_sql(query: &SourceQuery, columns: &[(&str, &Type)]) -> Option<String> {
    if columns.iter().all(|(_, ty)| has_native_decoder(ty)) {
        return None;
    }
    let col_list = columns
        .iter()
        .map(|(name, ty)| {
            let ident = quote_identifier(name);
            if has_native_decoder(ty) {
                format!("page.{ident}")
            } else {
                format!("page.{ident}::text AS {ident}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "SELECT {col_list} FROM ({}) AS page ORDER BY page.{}",
        query.sql, query.ordering_column
    ))
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Cursor value converted to the type the server inferred for `$1`.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorParam {
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl CursorParam {
    /// Pick the parameter representation for `cursor` given the declared
    /// type of the placeholder. Integers outside the column's range clamp
    /// to its bounds; an unknown placeholder type keeps the cursor's own.
    ///
    /// # Errors
    ///
    /// A timestamp cursor against a text ordering column is refused: the
    /// server would compare the two as strings.
    pub fn for_placeholder(cursor: &CursorValue, placeholder: Option<&Type>) -> Result<Self, String> {
        let declared = placeholder.map(Type::name);
        Ok(match (cursor, declared) {
            (CursorValue::Timestamp { .. }, Some(text @ ("text" | "varchar" | "bpchar"))) => {
                return Err(format!(
                    "timestamp cursor needs a timestamp ordering column, found {text}"
                ))
            }
            (_, Some("text" | "varchar" | "bpchar")) => Self::Text(cursor.encode()),
            (CursorValue::Int64 { value }, Some("int2")) => Self::Int2(
                i16::try_from(*value).unwrap_or(if *value < 0 { i16::MIN } else { i16::MAX }),
            ),
            (CursorValue::Int64 { value }, Some("int4")) => Self::Int4(
                i32::try_from(*value).unwrap_or(if *value < 0 { i32::MIN } else { i32::MAX }),
            ),
            (CursorValue::Int64 { value }, _) => Self::Int8(*value),
            (CursorValue::Timestamp { value }, Some("timestamptz")) => {
                Self::TimestampTz(DateTime::from_naive_utc_and_offset(*value, Utc))
            }
            (CursorValue::Timestamp { value }, _) => Self::Timestamp(*value),
            (CursorValue::Text { value }, _) => Self::Text(value.clone()),
        })
    }

    #[must_use]
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int2(v) => v,
            Self::Int4(v) => v,
            Self::Int8(v) => v,
            Self::Text(v) => v,
            Self::Timestamp(v) => v,
            Self::TimestampTz(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_query(ordering: &str) -> SourceQuery {
        SourceQuery::build(
            regsync_types::connector::Dialect::Postgres,
            "public",
            &regsync_types::state::TableName::new("ledger"),
            Some(&["entryid", "amount", "createddate"][..]),
            ordering,
            &CursorValue::Int64 { value: 0 },
            50,
        )
    }

    #[test]
    fn test_native_columns_need_no_rewrite() {
        let query = page_query("entryid");
        let columns = [
            ("entryid", &Type::INT8),
            ("note", &Type::VARCHAR),
            ("createddate", &Type::TIMESTAMP),
        ];
        assert_eq!(text_cast_sql(&query, &columns), None);
    }

    #[test]
    fn test_non_native_columns_are_cast_to_text() {
        let query = page_query("entryid");
        let columns = [
            ("entryid", &Type::INT8),
            ("amount", &Type::NUMERIC),
            ("createddate", &Type::TIMESTAMP),
        ];
        let sql = text_cast_sql(&query, &columns).unwrap();
        assert_eq!(
            sql,
            format!(
                "SELECT page.entryid, page.amount::text AS amount, page.createddate \
                 FROM ({}) AS page ORDER BY page.entryid",
                query.sql
            )
        );
    }

    #[test]
    fn test_cast_keeps_ordering_on_uncast_column() {
        // A NUMERIC ordering column is projected as text but still ordered
        // numerically through the subselect.
        let query = page_query("amount");
        let sql = text_cast_sql(&query, &[("amount", &Type::NUMERIC)]).unwrap();
        assert!(sql.ends_with("AS page ORDER BY page.amount"), "{sql}");
    }

    #[test]
    fn test_cursor_param_follows_placeholder_type() {
        let int = CursorValue::Int64 { value: 42 };
        assert_eq!(
            CursorParam::for_placeholder(&int, Some(&Type::INT8)),
            Ok(CursorParam::Int8(42))
        );
        assert_eq!(
            CursorParam::for_placeholder(&int, Some(&Type::INT4)),
            Ok(CursorParam::Int4(42))
        );
        assert_eq!(
            CursorParam::for_placeholder(&int, Some(&Type::TEXT)),
            Ok(CursorParam::Text("42".into()))
        );
    }

    #[test]
    fn test_cursor_param_clamps_epoch_to_column_range() {
        let epoch = CursorValue::Int64 { value: i64::MIN };
        assert_eq!(
            CursorParam::for_placeholder(&epoch, Some(&Type::INT4)),
            Ok(CursorParam::Int4(i32::MIN))
        );
        assert_eq!(
            CursorParam::for_placeholder(&epoch, Some(&Type::INT2)),
            Ok(CursorParam::Int2(i16::MIN))
        );
    }

    #[test]
    fn test_timestamp_cursor_binding() {
        let ts = CursorValue::decode(regsync_types::cursor::CursorKind::Timestamp, "010320231430")
            .unwrap();
        let CursorValue::Timestamp { value } = ts.clone() else {
            unreachable!()
        };
        assert_eq!(
            CursorParam::for_placeholder(&ts, Some(&Type::TIMESTAMP)),
            Ok(CursorParam::Timestamp(value))
        );
        assert_eq!(
            CursorParam::for_placeholder(&ts, Some(&Type::TIMESTAMPTZ)),
            Ok(CursorParam::TimestampTz(value.and_utc()))
        );
    }

    #[test]
    fn test_timestamp_cursor_refuses_text_ordering_column() {
        // Day-first report dates held as text do not sort chronologically:
        // "150620240900" < "1900-01-01-00.00.00.000000" as strings.
        let epoch = CursorValue::epoch(regsync_types::cursor::CursorKind::Timestamp);
        for ty in [&Type::VARCHAR, &Type::TEXT, &Type::BPCHAR] {
            let err = CursorParam::for_placeholder(&epoch, Some(ty)).unwrap_err();
            assert!(err.contains("timestamp ordering column"), "{err}");
        }
    }
}
