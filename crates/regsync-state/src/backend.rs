//! Cursor store trait definition.
//!
//! Model types live in [`regsync_types::state`].

use regsync_types::state::{CursorState, EndpointId, TableName};

use crate::error;

/// Storage contract for per-(endpoint, table) cursors.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn CursorStore>`.
/// Keys are disjoint across endpoints; one orchestrator writes each key.
pub trait CursorStore: Send + Sync {
    /// Read the current cursor for an (endpoint, table) pair.
    ///
    /// Returns `Ok(None)` when no cursor has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
    ) -> error::Result<Option<CursorState>>;

    /// Upsert the cursor for an (endpoint, table) pair unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_cursor(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        cursor: &CursorState,
    ) -> error::Result<()>;

    /// Compare-and-set: update the cursor only if the stored value matches `expected`.
    ///
    /// Returns `true` if the update was applied, `false` if the current value didn't match.
    /// When `expected` is `None`, succeeds only if the key does not exist (insert-if-absent).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn compare_and_set(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        cursor_field: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> error::Result<bool>;

    /// Every stored cursor of one endpoint, ordered by table name.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_cursors(&self, endpoint: &EndpointId) -> error::Result<Vec<(TableName, CursorState)>>;
}
