//! Per-cycle result types.

use regsync_types::cursor::CursorValue;
use regsync_types::state::TableName;
use serde::Serialize;

/// What happened to one table during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableOutcome {
    pub table: TableName,
    pub fetched: usize,
    /// Rows dropped before loading (undecodable or failed validation).
    pub dropped: u64,
    pub inserted: u64,
    /// Rows rejected by the destination in both batch and row mode.
    pub failed: u64,
    pub advanced_to: Option<CursorValue>,
    /// Set when the table was skipped or its load failed.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TableOutcome {
    pub(crate) fn new(table: TableName) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }
}

/// Result of one completed poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub tables: Vec<TableOutcome>,
}

impl CycleReport {
    #[must_use]
    pub fn inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    /// Records that never reached the destination.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed + t.dropped).sum()
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableOutcome> {
        self.tables
            .iter()
            .find(|t| t.table.as_str().eq_ignore_ascii_case(name))
    }
}
