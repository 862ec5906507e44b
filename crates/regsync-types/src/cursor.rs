//! Cursor types for incremental poll position tracking.
//!
//! A cursor is the highest ordering-column value already transferred for
//! an (endpoint, table) pair. The next poll asks the source only for rows
//! strictly greater than it.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CursorError;
use crate::timefmt;

/// Data type of a table's ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// 64-bit signed integer ordering column.
    Int64,
    /// Lexically ordered text column.
    Text,
    /// Date-time ordering column.
    Timestamp,
}

impl CursorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed cursor position value.
///
/// Values of the same kind are totally ordered; values of different kinds
/// are incomparable (`partial_cmp` returns `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorValue {
    Int64 { value: i64 },
    Text { value: String },
    Timestamp { value: NaiveDateTime },
}

impl CursorValue {
    /// Sentinel used when no cursor has been persisted yet. Every real
    /// value of the same kind compares greater than or equal to it.
    #[must_use]
    pub fn epoch(kind: CursorKind) -> Self {
        match kind {
            CursorKind::Int64 => Self::Int64 { value: i64::MIN },
            CursorKind::Text => Self::Text {
                value: String::new(),
            },
            CursorKind::Timestamp => Self::Timestamp {
                value: timefmt::epoch(),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> CursorKind {
        match self {
            Self::Int64 { .. } => CursorKind::Int64,
            Self::Text { .. } => CursorKind::Text,
            Self::Timestamp { .. } => CursorKind::Timestamp,
        }
    }

    /// Storage text for the cursor table.
    ///
    /// Timestamps use the DB2 native format so stored values sort the same
    /// way the source orders them.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Int64 { value } => value.to_string(),
            Self::Text { value } => value.clone(),
            Self::Timestamp { value } => timefmt::format_db2(value),
        }
    }

    /// Decode storage text produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Decode`] when `raw` is not a valid value of
    /// `kind`.
    pub fn decode(kind: CursorKind, raw: &str) -> Result<Self, CursorError> {
        let bad = || CursorError::Decode {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            CursorKind::Int64 => raw
                .trim()
                .parse::<i64>()
                .map(|value| Self::Int64 { value })
                .map_err(|_| bad()),
            CursorKind::Text => Ok(Self::Text {
                value: raw.to_string(),
            }),
            CursorKind::Timestamp => timefmt::parse_any(raw)
                .map(|value| Self::Timestamp { value })
                .ok_or_else(bad),
        }
    }

    /// `true` when `self` is strictly past `other`.
    #[must_use]
    pub fn is_after(&self, other: &Self) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl PartialOrd for CursorValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64 { value: a }, Self::Int64 { value: b }) => Some(a.cmp(b)),
            (Self::Text { value: a }, Self::Text { value: b }) => Some(a.cmp(b)),
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for CursorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
