//! In-memory source and destination used by the engine's unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regsync_types::connector::{
    Destination, Dialect, ProcessingLogEntry, SourceDriver, SourceQuery,
};
use regsync_types::error::{ConnectionError, FetchError, LoadError};
use regsync_types::record::{CanonicalRecord, FieldValue, RowEvent, RawRow};
use regsync_types::schema::{DestinationTable, SqlType};
use regsync_types::state::EndpointId;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SourceInner {
    tables: HashMap<String, Vec<RowEvent>>,
    connected: bool,
    unreachable: bool,
    connects: u32,
    fail_next: VecDeque<FetchError>,
    queries: Vec<SourceQuery>,
}

/// Source driver over in-memory tables.
///
/// Honors the `ordering > cursor` filter and the row limit of each query.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<SourceInner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&self, table: &str, row: RawRow) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(table.to_ascii_uppercase())
            .or_default()
            .push(RowEvent::Row(row));
    }

    pub fn add_undecodable(&self, table: &str, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table.to_ascii_uppercase()).or_default();
        let position = rows.len();
        rows.push(RowEvent::Undecodable {
            position,
            reason: reason.to_string(),
        });
    }

    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreachable = !reachable;
        if !reachable {
            inner.connected = false;
        }
    }

    pub fn fail_next_fetch(&self, err: FetchError) {
        self.inner.lock().unwrap().fail_next.push_back(err);
    }

    pub fn connects(&self) -> u32 {
        self.inner.lock().unwrap().connects
    }

    pub fn queries(&self) -> Vec<SourceQuery> {
        self.inner.lock().unwrap().queries.clone()
    }
}

impl SourceDriver for MemorySource {
    fn dialect(&self) -> Dialect {
        Dialect::Db2
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unreachable {
            return Err(ConnectionError::source("SQL30081N communication error"));
        }
        inner.connected = true;
        inner.connects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn probe(&mut self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected && !inner.unreachable
    }

    fn fetch(&mut self, query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        inner.queries.push(query.clone());
        if let Some(err) = inner.fail_next.pop_front() {
            if err.is_connection() {
                inner.connected = false;
            }
            return Err(err);
        }
        if inner.unreachable {
            inner.connected = false;
            return Err(ConnectionError::source("connection reset").into());
        }
        let column = query.ordering_column.as_str();
        let kind = query.cursor.kind();
        let mut rows: Vec<(Option<_>, RowEvent)> = inner
            .tables
            .get(&query.table.as_str().to_ascii_uppercase())
            .map(|rows| {
                rows.iter()
                    .map(|event| match event {
                        RowEvent::Row(row) => {
                            (row.get(column).and_then(|v| v.to_cursor(kind)), event.clone())
                        }
                        RowEvent::Undecodable { .. } => (None, event.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        rows.retain(|(ord, event)| match event {
            RowEvent::Row(_) => ord.as_ref().is_some_and(|o| o.is_after(&query.cursor)),
            RowEvent::Undecodable { .. } => true,
        });
        rows.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(rows
            .into_iter()
            .take(query.limit as usize)
            .map(|(_, event)| event)
            .collect())
    }

    fn disconnect(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DestInner {
    rows: HashMap<String, BTreeMap<String, CanonicalRecord>>,
    prepared: Vec<String>,
    log: Vec<ProcessingLogEntry>,
    unreachable: bool,
    fail_next: VecDeque<LoadError>,
    upsert_calls: usize,
}

/// Destination that upserts into in-memory maps.
///
/// A statement containing a NULL in a NOT NULL column, or text longer than
/// its `VARCHAR(n)` column, is rejected as a whole, like a real multi-row
/// insert.
#[derive(Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<DestInner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().unreachable = !reachable;
    }

    pub fn fail_next_upsert(&self, err: LoadError) {
        self.inner.lock().unwrap().fail_next.push_back(err);
    }

    /// Stored records of `table`, ordered by upsert key.
    pub fn rows(&self, table: &str) -> Vec<CanonicalRecord> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn prepared(&self) -> Vec<String> {
        self.inner.lock().unwrap().prepared.clone()
    }

    pub fn log(&self) -> Vec<ProcessingLogEntry> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn upsert_calls(&self) -> usize {
        self.inner.lock().unwrap().upsert_calls
    }
}

fn upsert_key(endpoint: &EndpointId, table: &DestinationTable, rec: &CanonicalRecord) -> String {
    let mut key = endpoint.to_string();
    for col in &table.natural_key {
        key.push('|');
        key.push_str(&format!("{:?}", rec.get(col)));
    }
    key
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn probe(&self) -> Result<(), ConnectionError> {
        if self.inner.lock().unwrap().unreachable {
            return Err(ConnectionError::destination("connection refused"));
        }
        Ok(())
    }

    async fn prepare(&self, tables: &[DestinationTable]) -> Result<(), LoadError> {
        let mut inner = self.inner.lock().unwrap();
        for table in tables {
            if !inner.prepared.contains(&table.name) {
                inner.prepared.push(table.name.clone());
            }
        }
        Ok(())
    }

    async fn upsert_batch(
        &self,
        endpoint: &EndpointId,
        table: &DestinationTable,
        records: &[CanonicalRecord],
    ) -> Result<u64, LoadError> {
        let mut inner = self.inner.lock().unwrap();
        inner.upsert_calls += 1;
        if let Some(err) = inner.fail_next.pop_front() {
            return Err(err);
        }
        if inner.unreachable {
            return Err(ConnectionError::destination("server closed the connection").into());
        }
        for rec in records {
            for col in &table.columns {
                match (rec.get(&col.name), col.sql_type) {
                    (FieldValue::Null, _) if !col.nullable => {
                        return Err(LoadError::rejected(
                            &table.name,
                            format!("null value in column \"{}\" violates not-null constraint", col.name),
                        ));
                    }
                    (FieldValue::Text(text), SqlType::Varchar(max)) if text.chars().count() > max as usize => {
                        return Err(LoadError::rejected(
                            &table.name,
                            format!("value too long for type character varying({max})"),
                        ));
                    }
                    _ => {}
                }
            }
        }
        let stored = inner.rows.entry(table.name.clone()).or_default();
        for rec in records {
            stored.insert(upsert_key(endpoint, table, rec), rec.clone());
        }
        Ok(records.len() as u64)
    }

    async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<(), LoadError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unreachable {
            return Err(ConnectionError::destination("connection refused").into());
        }
        inner.log.push(entry.clone());
        Ok(())
    }
}
