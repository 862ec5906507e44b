//! Cursor reads and advancement.
//!
//! Store calls are blocking; callers run them on the blocking pool.

use regsync_state::{CursorStore, StateError};
use regsync_types::cursor::{CursorKind, CursorValue};
use regsync_types::state::{EndpointId, TableName};

/// Cursor as read at the start of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPosition {
    pub value: CursorValue,
    /// Raw stored text, used as the compare-and-set expectation.
    pub stored: Option<String>,
}

/// Result of an advance attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Advanced { to: CursorValue },
    /// Nothing inserted, or nothing past the current position.
    Unchanged,
    /// Another writer changed the stored cursor since it was read.
    Conflict,
}

/// Read the cursor of (`endpoint`, `table`), defaulting to the epoch of
/// `kind`.
///
/// # Errors
///
/// Returns [`StateError`] when the store cannot be read.
pub fn read_cursor(
    store: &dyn CursorStore,
    endpoint: &EndpointId,
    table: &TableName,
    kind: CursorKind,
) -> Result<CursorPosition, StateError> {
    let stored = store
        .get_cursor(endpoint, table)?
        .and_then(|state| state.cursor_value);
    let value = match stored.as_deref() {
        None => CursorValue::epoch(kind),
        Some(raw) => CursorValue::decode(kind, raw).unwrap_or_else(|err| {
            tracing::warn!(
                endpoint = endpoint.as_str(),
                table = table.as_str(),
                error = %err,
                "Stored cursor unreadable, restarting from epoch"
            );
            CursorValue::epoch(kind)
        }),
    };
    Ok(CursorPosition { value, stored })
}

/// Move the cursor to `candidate` when at least one record was inserted
/// and `candidate` is strictly past `current`.
///
/// # Errors
///
/// Returns [`StateError`] when the store write fails.
pub fn advance_cursor(
    store: &dyn CursorStore,
    endpoint: &EndpointId,
    table: &TableName,
    cursor_field: &str,
    current: &CursorPosition,
    inserted: u64,
    candidate: Option<&CursorValue>,
) -> Result<Advance, StateError> {
    let Some(candidate) = candidate.filter(|c| inserted > 0 && c.is_after(&current.value)) else {
        return Ok(Advance::Unchanged);
    };

    let encoded = candidate.encode();
    if !store.compare_and_set(
        endpoint,
        table,
        cursor_field,
        current.stored.as_deref(),
        &encoded,
    )? {
        tracing::warn!(
            endpoint = endpoint.as_str(),
            table = table.as_str(),
            expected = current.stored.as_deref(),
            "Cursor changed by another writer; not advancing"
        );
        return Ok(Advance::Conflict);
    }

    tracing::info!(
        endpoint = endpoint.as_str(),
        table = table.as_str(),
        cursor_field,
        cursor_value = encoded,
        "Cursor advanced"
    );
    Ok(Advance::Advanced {
        to: candidate.clone(),
    })
}
