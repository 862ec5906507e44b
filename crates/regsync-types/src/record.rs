//! Raw source rows and canonical destination records.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::cursor::{CursorKind, CursorValue};
use crate::state::TableName;
use crate::timefmt;

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// One column value as decoded by a source driver.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl RawValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text rendering of the value; `None` for SQL `NULL`.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Self::Int(v) => Some(Cow::Owned(v.to_string())),
            Self::Float(v) => Some(Cow::Owned(v.to_string())),
            Self::Bool(v) => Some(Cow::Owned(v.to_string())),
            Self::Timestamp(ts) => Some(Cow::Owned(timefmt::format_db2(ts))),
        }
    }

    /// Interpret the value as a cursor position of `kind`.
    ///
    /// Returns `None` for `NULL` and for values that cannot represent the
    /// requested kind.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_cursor(&self, kind: CursorKind) -> Option<CursorValue> {
        match (kind, self) {
            (_, Self::Null) => None,
            (CursorKind::Int64, Self::Int(v)) => Some(CursorValue::Int64 { value: *v }),
            (CursorKind::Int64, Self::Float(v)) if v.fract() == 0.0 && v.is_finite() => {
                Some(CursorValue::Int64 { value: *v as i64 })
            }
            (CursorKind::Timestamp, Self::Timestamp(ts)) => {
                Some(CursorValue::Timestamp { value: *ts })
            }
            (kind, other) => {
                let text = other.as_text()?;
                CursorValue::decode(kind, &text).ok()
            }
        }
    }

    /// JSON rendering used for pass-through payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Timestamp(ts) => serde_json::Value::String(timefmt::format_db2(ts)),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A source row: column names in result-set order with their values.
///
/// Lookup is case-insensitive because DB2 reports upper-case column names
/// while other drivers may fold to lower case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    columns: Vec<(String, RawValue)>,
}

impl RawRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.push(name, value);
        self
    }

    /// Value of `name`, or `None` if the column is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Result-set item produced by a source fetch.
///
/// A row that fails to decode is reported in place instead of ending the
/// result set, so one bad row never truncates the rows after it.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEvent {
    Row(RawRow),
    Undecodable { position: usize, reason: String },
}

// ---------------------------------------------------------------------------
// Destination side
// ---------------------------------------------------------------------------

/// A destination column value after coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A source row reshaped for its destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    /// Source table the row came from.
    pub table: TableName,
    /// Destination column (lower_snake) to value.
    pub fields: BTreeMap<String, FieldValue>,
    /// Value of the source ordering column; drives cursor advancement.
    pub ordering: CursorValue,
}

impl CanonicalRecord {
    #[must_use]
    pub fn new(table: TableName, ordering: CursorValue) -> Self {
        Self {
            table,
            fields: BTreeMap::new(),
            ordering,
        }
    }

    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.fields.insert(column.into(), value);
    }

    /// Value of `column`; absent columns read as `Null`.
    #[must_use]
    pub fn get(&self, column: &str) -> &FieldValue {
        self.fields.get(column).unwrap_or(&FieldValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_row_lookup_ignores_case() {
        let row = RawRow::new().with("REPORTINGDATE", "010320231430");
        assert_eq!(
            row.get("reportingdate"),
            Some(&RawValue::Text("010320231430".into()))
        );
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn raw_value_to_int_cursor() {
        assert_eq!(
            RawValue::Int(100).to_cursor(CursorKind::Int64),
            Some(CursorValue::Int64 { value: 100 })
        );
        assert_eq!(
            RawValue::Text(" 7 ".into()).to_cursor(CursorKind::Int64),
            Some(CursorValue::Int64 { value: 7 })
        );
        assert_eq!(RawValue::Float(1.5).to_cursor(CursorKind::Int64), None);
        assert_eq!(RawValue::Null.to_cursor(CursorKind::Int64), None);
    }

    #[test]
    fn raw_value_to_timestamp_cursor_from_report_date() {
        let cv = RawValue::Text("010320231430".into())
            .to_cursor(CursorKind::Timestamp)
            .unwrap();
        assert_eq!(cv.encode(), "2023-03-01-14.30.00.000000");
    }

    #[test]
    fn option_converts_to_null() {
        let v: RawValue = Option::<&str>::None.into();
        assert!(v.is_null());
    }

    #[test]
    fn canonical_record_missing_field_reads_null() {
        let rec = CanonicalRecord::new(TableName::new("T"), CursorValue::Int64 { value: 1 });
        assert!(rec.get("nothing").is_null());
    }

    #[test]
    fn field_value_json_shape() {
        let json = serde_json::to_value(FieldValue::Int(3)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int", "value": 3}));
    }
}
