//! Fallback handler for tables without a descriptor.
//!
//! Selects every column and stores the row as a JSON payload keyed by a
//! SHA-256 digest, so unknown tables still sync without losing data.

use regsync_types::cursor::CursorKind;
use regsync_types::error::TransformError;
use regsync_types::record::{CanonicalRecord, FieldValue, RawRow};
use regsync_types::schema::{ColumnSpec, DestinationTable, SqlType};
use regsync_types::state::TableName;
use sha2::{Digest, Sha256};

use super::{TableHandler, SOURCE_TIMESTAMP_COLUMN};
use crate::transform;

pub const RAW_RECORDS_TABLE: &str = "bot_raw_records";

/// Row creation timestamp present on every core-banking table.
const ORDERING_COLUMN: &str = "CREATEDDATE";

fn raw_records_table() -> DestinationTable {
    DestinationTable {
        name: RAW_RECORDS_TABLE.to_string(),
        columns: vec![
            ColumnSpec::new("source_table", SqlType::Varchar(100)).not_null(),
            ColumnSpec::new("ordering_value", SqlType::Text).not_null(),
            ColumnSpec::new("payload_digest", SqlType::Varchar(64)).not_null(),
            ColumnSpec::new("payload", SqlType::Jsonb).not_null(),
            ColumnSpec::new(SOURCE_TIMESTAMP_COLUMN, SqlType::Varchar(32)),
        ],
        natural_key: vec!["source_table".into(), "payload_digest".into()],
        indexed: vec!["source_table".into()],
    }
}

#[derive(Debug, Clone)]
pub struct PassthroughTable {
    name: TableName,
    destination: DestinationTable,
}

impl PassthroughTable {
    #[must_use]
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            destination: raw_records_table(),
        }
    }
}

impl TableHandler for PassthroughTable {
    fn name(&self) -> &TableName {
        &self.name
    }

    fn ordering_column(&self) -> &str {
        ORDERING_COLUMN
    }

    fn cursor_kind(&self) -> CursorKind {
        CursorKind::Timestamp
    }

    fn projection(&self) -> Option<Vec<&str>> {
        None
    }

    fn destination(&self) -> &DestinationTable {
        &self.destination
    }

    fn transform(&self, row: &RawRow) -> Result<CanonicalRecord, TransformError> {
        let ordering_raw = row.get(ORDERING_COLUMN);
        let ordering = ordering_raw
            .and_then(|v| v.to_cursor(CursorKind::Timestamp))
            .ok_or_else(|| TransformError::BadOrdering {
                table: self.name.to_string(),
                column: ORDERING_COLUMN.to_string(),
                kind: CursorKind::Timestamp,
            })?;

        let payload: serde_json::Map<String, serde_json::Value> = row
            .iter()
            .map(|(col, value)| (col.to_ascii_lowercase(), value.to_json()))
            .collect();
        let payload = serde_json::Value::Object(payload);
        let digest = format!("{:x}", Sha256::digest(payload.to_string().as_bytes()));

        let mut record = CanonicalRecord::new(self.name.clone(), ordering.clone());
        record.set("source_table", FieldValue::Text(self.name.to_string()));
        record.set("ordering_value", FieldValue::Text(ordering.encode()));
        record.set("payload_digest", FieldValue::Text(digest));
        record.set("payload", FieldValue::Json(payload));
        record.set(SOURCE_TIMESTAMP_COLUMN, transform::text(ordering_raw));
        Ok(record)
    }
}
