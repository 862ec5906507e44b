//! Table descriptors: how each monitored source table is queried,
//! transformed and stored.
//!
//! Adding a table is a data change: describe it as a [`TableSpec`] and
//! register a [`MappedTable`] built from it. Tables without a descriptor
//! fall back to [`PassthroughTable`].

mod catalog;
mod mapped;
mod passthrough;

use std::collections::HashMap;
use std::sync::Arc;

use regsync_types::connector::{Dialect, SourceQuery};
use regsync_types::cursor::{CursorKind, CursorValue};
use regsync_types::error::TransformError;
use regsync_types::record::{CanonicalRecord, RawRow};
use regsync_types::schema::DestinationTable;
use regsync_types::state::TableName;

pub use catalog::{ASSET_OWNED_OR_ACQUIRED, PERSONAL_DATA_INDIVIDUALS};
pub use mapped::{FieldSpec, MappedTable, TableSpec};
pub use passthrough::{PassthroughTable, RAW_RECORDS_TABLE};

/// Destination column holding the raw ordering value as delivered.
pub const SOURCE_TIMESTAMP_COLUMN: &str = "source_timestamp";

/// Everything the engine needs to know about one source table.
pub trait TableHandler: Send + Sync {
    fn name(&self) -> &TableName;

    /// Source column used for `> cursor` filtering and ordering.
    fn ordering_column(&self) -> &str;

    fn cursor_kind(&self) -> CursorKind;

    /// Explicit source column list; `None` selects every column.
    fn projection(&self) -> Option<Vec<&str>>;

    fn destination(&self) -> &DestinationTable;

    /// Reshape one source row. Pure; never performs I/O.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the row fails validation or its
    /// ordering value is unusable.
    fn transform(&self, row: &RawRow) -> Result<CanonicalRecord, TransformError>;

    /// Incremental fetch statement for this table.
    fn query(
        &self,
        dialect: Dialect,
        schema: &str,
        cursor: &CursorValue,
        limit: u32,
    ) -> SourceQuery {
        let projection = self.projection();
        SourceQuery::build(
            dialect,
            schema,
            self.name(),
            projection.as_deref(),
            self.ordering_column(),
            cursor,
            limit,
        )
    }
}

/// Lookup from source table name (case-insensitive) to its handler.
pub struct TableRegistry {
    handlers: HashMap<String, Arc<dyn TableHandler>>,
}

impl TableRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the regulatory report tables.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MappedTable::from_spec(&PERSONAL_DATA_INDIVIDUALS)));
        registry.register(Arc::new(MappedTable::from_spec(&ASSET_OWNED_OR_ACQUIRED)));
        registry
    }

    /// Add or replace the handler for `handler.name()`.
    pub fn register(&mut self, handler: Arc<dyn TableHandler>) {
        self.handlers
            .insert(handler.name().as_str().to_ascii_uppercase(), handler);
    }

    #[must_use]
    pub fn get(&self, name: &TableName) -> Option<Arc<dyn TableHandler>> {
        self.handlers
            .get(&name.as_str().to_ascii_uppercase())
            .cloned()
    }

    /// Handler for `name`, falling back to a pass-through handler.
    ///
    /// The fallback selects `*`, so its payload keys depend on what the
    /// source driver reports as column names.
    #[must_use]
    pub fn resolve(&self, name: &TableName) -> Arc<dyn TableHandler> {
        if let Some(handler) = self.get(name) {
            return handler;
        }
        tracing::warn!(
            table = name.as_str(),
            "No table descriptor registered; using SELECT * pass-through into {RAW_RECORDS_TABLE}"
        );
        Arc::new(PassthroughTable::new(name.clone()))
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Distinct destination tables of `handlers`, in first-seen order.
#[must_use]
pub fn destination_tables(handlers: &[Arc<dyn TableHandler>]) -> Vec<DestinationTable> {
    let mut out: Vec<DestinationTable> = Vec::new();
    for handler in handlers {
        let dest = handler.destination();
        if !out.iter().any(|t| t.name == dest.name) {
            out.push(dest.clone());
        }
    }
    out
}
