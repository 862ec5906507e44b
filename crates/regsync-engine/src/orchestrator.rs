//! Per-endpoint poll loop.
//!
//! ```text
//! Idle -> Connecting -> Polling -> Loading -> Advancing -> Sleeping -> Idle
//!            ^                                                 |
//!            +------------------ Recovering <---- any error ---+
//! ```
//!
//! Only the initial connection can fail the loop. Every later failure
//! abandons the current cycle, waits twice the poll interval and starts
//! over from `Connecting`.
//!
//! A fetch that fills its page may have cut a group of rows sharing one
//! ordering value. The cursor then stops below the last value of the page
//! so the group is read again in full next cycle; a page made of a single
//! value doubles that table's page size instead.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regsync_state::CursorStore;
use regsync_types::connector::Destination;
use regsync_types::cursor::CursorValue;
use regsync_types::error::{ConnectionError, FetchError, LoadError};
use regsync_types::record::{CanonicalRecord, RowEvent};
use regsync_types::state::EndpointId;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::checkpoint::{self, Advance, CursorPosition};
use crate::error::{CycleError, PollerError};
use crate::loader::BatchLoader;
use crate::metrics::EndpointMetrics;
use crate::result::{CycleReport, TableOutcome};
use crate::retry::{connect_with_retry, RetryPolicy};
use crate::source::SourceConnector;
use crate::tables::TableHandler;

/// Cycles between periodic metrics summaries.
const SUMMARY_EVERY: u64 = 10;

/// Phase of an endpoint loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Connecting,
    Polling,
    Loading,
    Advancing,
    Sleeping,
    Recovering,
    Stopped,
}

/// Out-of-band instruction, observed between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Drop the source connection and start a new cycle now.
    Restart,
    /// Stop after the in-flight cycle.
    Shutdown,
}

/// Static settings of one endpoint loop.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub id: EndpointId,
    pub schema: String,
    pub fetch_batch_size: u32,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
}

enum Wake {
    Elapsed,
    Restart,
    Shutdown,
}

/// One polled table and its current page size.
struct TableSlot {
    handler: Arc<dyn TableHandler>,
    page_size: AtomicU32,
}

/// Ordering values of a fetch that returned a full page.
#[derive(Debug, Clone, PartialEq)]
struct FullPage {
    last: CursorValue,
    /// Greatest value strictly below `last`; `None` when every row shares it.
    below_last: Option<CursorValue>,
}

/// Sequential poll loop for one endpoint.
pub struct EndpointPoller {
    settings: EndpointSettings,
    source: SourceConnector,
    loader: BatchLoader,
    store: Arc<dyn CursorStore>,
    tables: Vec<TableSlot>,
    metrics: Arc<EndpointMetrics>,
    control: mpsc::Receiver<Control>,
}

impl EndpointPoller {
    #[must_use]
    pub fn new(
        settings: EndpointSettings,
        source: SourceConnector,
        loader: BatchLoader,
        store: Arc<dyn CursorStore>,
        handlers: Vec<Arc<dyn TableHandler>>,
        metrics: Arc<EndpointMetrics>,
        control: mpsc::Receiver<Control>,
    ) -> Self {
        let tables = handlers
            .into_iter()
            .map(|handler| TableSlot {
                handler,
                page_size: AtomicU32::new(settings.fetch_batch_size),
            })
            .collect();
        Self {
            settings,
            source,
            loader,
            store,
            tables,
            metrics,
            control,
        }
    }

    fn enter(&self, state: PollState) {
        tracing::debug!(endpoint = self.settings.id.as_str(), ?state, "State transition");
        self.metrics.set_state(state);
    }

    /// Run until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`PollerError::ConnectExhausted`] when either side cannot be
    /// reached within the retry budget at startup.
    pub async fn run(mut self) -> Result<(), PollerError> {
        self.enter(PollState::Connecting);
        if let Wake::Shutdown = self.connect_initial().await? {
            self.stop().await;
            return Ok(());
        }
        tracing::info!(
            endpoint = self.settings.id.as_str(),
            tables = self.tables.len(),
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Endpoint poller started"
        );

        loop {
            self.enter(PollState::Idle);
            let started = Instant::now();
            let cycle = self.run_cycle().await;
            self.metrics.record_processing_time(elapsed_ms(started));
            let wait = match cycle {
                Ok(report) => {
                    self.record_success(&report);
                    self.settings.poll_interval
                }
                Err(err) => {
                    self.record_failure(&err);
                    self.enter(PollState::Recovering);
                    self.source.disconnect().await;
                    self.settings.poll_interval.saturating_mul(2)
                }
            };

            let wake = match self.control.try_recv() {
                Ok(Control::Shutdown) => Wake::Shutdown,
                Ok(Control::Restart) => Wake::Restart,
                Err(_) => {
                    self.enter(PollState::Sleeping);
                    self.sleep(wait).await
                }
            };
            match wake {
                Wake::Elapsed => {}
                Wake::Restart => {
                    tracing::info!(endpoint = self.settings.id.as_str(), "Restart requested");
                    self.source.disconnect().await;
                }
                Wake::Shutdown => break,
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn stop(&self) {
        self.source.disconnect().await;
        self.enter(PollState::Stopped);
        tracing::info!(endpoint = self.settings.id.as_str(), "Endpoint poller stopped");
    }

    async fn sleep(&mut self, wait: Duration) -> Wake {
        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);
        tokio::select! {
            () = &mut deadline => Wake::Elapsed,
            msg = self.control.recv() => match msg {
                Some(Control::Restart) => Wake::Restart,
                Some(Control::Shutdown) => Wake::Shutdown,
                // Every sender is gone; only the timer can wake us now.
                None => {
                    deadline.await;
                    Wake::Elapsed
                }
            },
        }
    }

    /// Initial connection of both sides, interruptible by control messages.
    /// `Restart` starts the retry budget over; `Shutdown` abandons it and
    /// returns [`Wake::Shutdown`].
    async fn connect_initial(&mut self) -> Result<Wake, PollerError> {
        let source = self.source.clone();
        let dest = self.loader.destination().clone();
        let (retry, timeout) = (self.settings.retry, self.settings.probe_timeout);
        let connect = connect_both(source.clone(), dest.clone(), retry, timeout);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return result.map(|()| Wake::Elapsed),
                msg = self.control.recv() => match msg {
                    Some(Control::Shutdown) => {
                        tracing::info!(
                            endpoint = self.settings.id.as_str(),
                            "Shutdown requested during initial connect"
                        );
                        return Ok(Wake::Shutdown);
                    }
                    Some(Control::Restart) => {
                        tracing::info!(
                            endpoint = self.settings.id.as_str(),
                            "Restart requested, connecting again now"
                        );
                        connect.set(connect_both(source.clone(), dest.clone(), retry, timeout));
                    }
                    None => return (&mut connect).await.map(|()| Wake::Elapsed),
                },
            }
        }
    }

    fn record_success(&self, report: &CycleReport) {
        self.metrics.record_cycle_success(chrono::Utc::now());
        let successes = self.metrics.successful_polls();
        tracing::info!(
            endpoint = self.settings.id.as_str(),
            inserted = report.inserted(),
            failed = report.failed(),
            "Poll cycle complete"
        );
        if successes % SUMMARY_EVERY == 0 {
            let snap = self.metrics.snapshot(&self.settings.id, chrono::Utc::now());
            tracing::info!(
                endpoint = self.settings.id.as_str(),
                polls = snap.polls,
                successful_polls = snap.successful_polls,
                failed_polls = snap.failed_polls,
                records_processed = snap.records_processed,
                records_failed = snap.records_failed,
                connection_failures = snap.connection_failures,
                "Metrics summary"
            );
        }
    }

    fn record_failure(&self, err: &CycleError) {
        if matches!(err, CycleError::Connection(_) | CycleError::Load(LoadError::Timeout(_))) {
            self.metrics.record_connection_failure();
        }
        self.metrics
            .record_cycle_failure(chrono::Utc::now(), &err.to_string());
        tracing::error!(
            endpoint = self.settings.id.as_str(),
            error = %err,
            retry_in_secs = self.settings.poll_interval.saturating_mul(2).as_secs(),
            "Poll cycle abandoned"
        );
    }

    /// One full cycle over every table.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] when either connection is lost or the cursor
    /// store fails; per-table query failures only skip that table.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.enter(PollState::Connecting);
        if !self.source.test_connection(self.settings.probe_timeout).await {
            tracing::warn!(
                endpoint = self.settings.id.as_str(),
                "Source probe failed, reconnecting"
            );
            self.source.connect().await?;
        }
        probe_destination(self.loader.destination().as_ref(), self.settings.probe_timeout).await?;

        let mut report = CycleReport::default();
        for slot in &self.tables {
            report.tables.push(self.sync_table(slot).await?);
        }
        Ok(report)
    }

    async fn sync_table(&self, slot: &TableSlot) -> Result<TableOutcome, CycleError> {
        let started = Instant::now();
        let endpoint = &self.settings.id;
        let handler = slot.handler.as_ref();
        let table = handler.name().clone();
        let mut outcome = TableOutcome::new(table.clone());

        self.enter(PollState::Polling);
        let position = self.read_cursor(handler).await?;
        let page_size = slot.page_size.load(Ordering::Relaxed);
        let query = handler.query(
            self.source.dialect(),
            &self.settings.schema,
            &position.value,
            page_size,
        );
        let events = match self.source.fetch(query).await {
            Ok(events) => events,
            Err(FetchError::Connection(err)) => return Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    endpoint = endpoint.as_str(),
                    table = table.as_str(),
                    error = %err,
                    "Fetch failed, skipping table this cycle"
                );
                outcome.error = Some(err.to_string());
                return Ok(outcome);
            }
        };
        outcome.fetched = events.len();
        let full_page = full_page(handler, &events, page_size);

        let records = self.transform_rows(handler, events, &mut outcome);
        if records.is_empty() {
            outcome.duration_ms = elapsed_ms(started);
            if outcome.fetched > 0 {
                self.metrics.record_processed(0, outcome.dropped);
            }
            return Ok(outcome);
        }

        self.enter(PollState::Loading);
        let load = self
            .loader
            .load(endpoint, handler.destination(), &records)
            .await;
        let (max_loaded, error) = match load {
            Ok(load) => {
                outcome.inserted = load.inserted;
                outcome.failed = load.failed;
                (load.max_loaded, None)
            }
            Err(err) if err.is_connection() => return Err(err.into()),
            Err(err) => {
                outcome.failed = records.len() as u64;
                (None, Some(err.to_string()))
            }
        };
        outcome.duration_ms = elapsed_ms(started);
        self.loader
            .log_outcome(
                endpoint,
                &table,
                outcome.inserted,
                outcome.failed + outcome.dropped,
                outcome.duration_ms,
                error.clone(),
            )
            .await;
        self.metrics
            .record_processed(outcome.inserted, outcome.failed + outcome.dropped);
        outcome.error = error;

        self.enter(PollState::Advancing);
        let candidate = match full_page {
            None => max_loaded,
            Some(page) => self.hold_below_last(slot, page_size, page),
        };
        if let Advance::Advanced { to } = self
            .advance_cursor(handler, position, outcome.inserted, candidate)
            .await?
        {
            outcome.advanced_to = Some(to);
        }
        Ok(outcome)
    }

    /// Advance candidate for a full page. Rows sharing the last ordering
    /// value may continue past the page, so the cursor stops below it.
    fn hold_below_last(
        &self,
        slot: &TableSlot,
        page_size: u32,
        page: FullPage,
    ) -> Option<CursorValue> {
        let table = slot.handler.name().as_str();
        if page.below_last.is_none() {
            let raised = page_size.saturating_mul(2);
            slot.page_size.store(raised, Ordering::Relaxed);
            tracing::warn!(
                endpoint = self.settings.id.as_str(),
                table,
                ordering = %page.last,
                page_size = raised,
                "Whole page shares one ordering value; raising page size"
            );
        } else {
            tracing::debug!(
                endpoint = self.settings.id.as_str(),
                table,
                last = %page.last,
                "Page full; cursor held below its last ordering value"
            );
        }
        page.below_last
    }

    fn transform_rows(
        &self,
        handler: &dyn TableHandler,
        events: Vec<RowEvent>,
        outcome: &mut TableOutcome,
    ) -> Vec<CanonicalRecord> {
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            match event {
                RowEvent::Row(row) => match handler.transform(&row) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        outcome.dropped += 1;
                        let ordering = row
                            .get(handler.ordering_column())
                            .and_then(|v| v.as_text().map(std::borrow::Cow::into_owned));
                        tracing::warn!(
                            endpoint = self.settings.id.as_str(),
                            ordering = ordering.as_deref(),
                            error = %err,
                            "Record dropped"
                        );
                    }
                },
                RowEvent::Undecodable { position, reason } => {
                    outcome.dropped += 1;
                    tracing::warn!(
                        endpoint = self.settings.id.as_str(),
                        table = handler.name().as_str(),
                        position,
                        reason,
                        "Undecodable source row skipped"
                    );
                }
            }
        }
        records
    }

    async fn read_cursor(&self, handler: &dyn TableHandler) -> Result<CursorPosition, CycleError> {
        let store = self.store.clone();
        let endpoint = self.settings.id.clone();
        let table = handler.name().clone();
        let kind = handler.cursor_kind();
        let position = tokio::task::spawn_blocking(move || {
            checkpoint::read_cursor(store.as_ref(), &endpoint, &table, kind)
        })
        .await
        .map_err(|e| PollerError::panicked("read_cursor", &e))??;
        Ok(position)
    }

    async fn advance_cursor(
        &self,
        handler: &dyn TableHandler,
        position: CursorPosition,
        inserted: u64,
        candidate: Option<CursorValue>,
    ) -> Result<Advance, CycleError> {
        let store = self.store.clone();
        let endpoint = self.settings.id.clone();
        let table = handler.name().clone();
        let field = handler.ordering_column().to_string();
        let advance = tokio::task::spawn_blocking(move || {
            checkpoint::advance_cursor(
                store.as_ref(),
                &endpoint,
                &table,
                &field,
                &position,
                inserted,
                candidate.as_ref(),
            )
        })
        .await
        .map_err(|e| PollerError::panicked("advance_cursor", &e))??;
        Ok(advance)
    }
}

async fn connect_both(
    source: SourceConnector,
    dest: Arc<dyn Destination>,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<(), PollerError> {
    connect_with_retry(retry, "source", || {
        let source = source.clone();
        async move { source.connect().await }
    })
    .await?;
    connect_with_retry(retry, "destination", || {
        let dest = dest.clone();
        async move { probe_destination(dest.as_ref(), timeout).await }
    })
    .await
}

/// `Some` when `events` filled the page of `page_size` rows and at least
/// one row carries a readable ordering value.
fn full_page(handler: &dyn TableHandler, events: &[RowEvent], page_size: u32) -> Option<FullPage> {
    if events.len() < usize::try_from(page_size).unwrap_or(usize::MAX) {
        return None;
    }
    let kind = handler.cursor_kind();
    let orderings: Vec<CursorValue> = events
        .iter()
        .filter_map(|event| match event {
            RowEvent::Row(row) => row.get(handler.ordering_column())?.to_cursor(kind),
            RowEvent::Undecodable { .. } => None,
        })
        .collect();
    let last = greatest(orderings.iter())?.clone();
    let below_last = greatest(orderings.iter().filter(|v| last.is_after(v))).cloned();
    Some(FullPage { last, below_last })
}

fn greatest<'a>(values: impl Iterator<Item = &'a CursorValue>) -> Option<&'a CursorValue> {
    values.fold(None, |max, v| match max {
        Some(m) if !v.is_after(m) => Some(m),
        _ => Some(v),
    })
}

/// `Destination::probe` bounded by `timeout`.
async fn probe_destination(
    dest: &dyn Destination,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    match tokio::time::timeout(timeout, dest.probe()).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::destination(format!(
            "probe timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::tables::{FieldSpec, MappedTable, TableSpec};
    use crate::testing::{MemoryDestination, MemorySource};
    use regsync_state::SqliteCursorStore;
    use regsync_types::cursor::CursorKind;
    use regsync_types::record::RawRow;
    use regsync_types::state::{CursorState, TableName};

    static LEDGER: TableSpec = TableSpec {
        source: "LEDGER",
        destination: "bot_ledger",
        ordering: "entryId",
        cursor_kind: CursorKind::Int64,
        fields: &[
            FieldSpec::integer("entryId"),
            FieldSpec::text("accountNumber", 20),
            FieldSpec::money("amount"),
        ],
        natural_key: &["entryId"],
        required: &["accountNumber"],
        indexed: &[],
    };

    /// Same source table, polled on a non-unique batch number.
    static BATCHED_LEDGER: TableSpec = TableSpec {
        source: "LEDGER",
        destination: "bot_ledger",
        ordering: "batchNo",
        cursor_kind: CursorKind::Int64,
        fields: &[
            FieldSpec::integer("entryId"),
            FieldSpec::integer("batchNo"),
            FieldSpec::text("accountNumber", 20),
        ],
        natural_key: &["entryId"],
        required: &["accountNumber"],
        indexed: &[],
    };

    struct Harness {
        source: MemorySource,
        dest: MemoryDestination,
        store: Arc<SqliteCursorStore>,
        metrics: Arc<EndpointMetrics>,
        control: mpsc::Sender<Control>,
        poller: EndpointPoller,
    }

    fn harness() -> Harness {
        harness_for(&LEDGER, 1000)
    }

    fn harness_for(spec: &'static TableSpec, fetch_batch_size: u32) -> Harness {
        let source = MemorySource::new();
        let dest = MemoryDestination::new();
        let store = Arc::new(SqliteCursorStore::in_memory().unwrap());
        let registry = MetricsRegistry::new();
        let id = EndpointId::new("mcb");
        let metrics = registry.endpoint(&id);
        let (tx, rx) = mpsc::channel(4);
        let settings = EndpointSettings {
            id,
            schema: "CBS_SCHEMA".into(),
            fetch_batch_size,
            poll_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        };
        let poller = EndpointPoller::new(
            settings,
            SourceConnector::new(Box::new(source.clone())),
            BatchLoader::new(Arc::new(dest.clone()), 100),
            store.clone(),
            vec![Arc::new(MappedTable::from_spec(spec))],
            metrics.clone(),
            rx,
        );
        Harness {
            source,
            dest,
            store,
            metrics,
            control: tx,
            poller,
        }
    }

    fn ledger_row(id: i64, account: &str) -> RawRow {
        RawRow::new()
            .with("ENTRYID", id)
            .with("ACCOUNTNUMBER", account)
            .with("AMOUNT", "10.00")
    }

    fn batched_row(id: i64, batch: i64) -> RawRow {
        RawRow::new()
            .with("ENTRYID", id)
            .with("BATCHNO", batch)
            .with("ACCOUNTNUMBER", "ACC")
    }

    fn stored_cursor(h: &Harness) -> Option<String> {
        h.store
            .get_cursor(&EndpointId::new("mcb"), &TableName::new("LEDGER"))
            .unwrap()
            .and_then(|c| c.cursor_value)
    }

    fn seed_cursor(h: &Harness, value: &str) {
        h.store
            .set_cursor(
                &EndpointId::new("mcb"),
                &TableName::new("LEDGER"),
                &CursorState {
                    cursor_field: Some("ENTRYID".into()),
                    cursor_value: Some(value.into()),
                    updated_at: String::new(),
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_loads_rows_past_cursor() {
        let h = harness();
        seed_cursor(&h, "99");
        for id in [50_i64, 100, 101, 102] {
            h.source.add_row("LEDGER", ledger_row(id, "ACC"));
        }

        let report = h.poller.run_cycle().await.unwrap();
        let ledger = report.table("LEDGER").unwrap();
        assert_eq!(ledger.fetched, 3);
        assert_eq!(ledger.inserted, 3);
        assert_eq!(ledger.advanced_to, Some(CursorValue::Int64 { value: 102 }));
        assert_eq!(stored_cursor(&h).as_deref(), Some("102"));
        assert_eq!(h.dest.rows("bot_ledger").len(), 3);
        let snap = h.metrics.snapshot(&EndpointId::new("mcb"), chrono::Utc::now());
        assert_eq!(snap.records_processed, 3);

        let query = &h.source.queries()[0];
        assert!(query.sql.contains("FROM CBS_SCHEMA.LEDGER WHERE ENTRYID > ?"));
        assert_eq!(query.cursor, CursorValue::Int64 { value: 99 });

        let log = h.dest.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].records_processed, 3);
    }

    #[tokio::test]
    async fn test_second_cycle_is_incremental() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        h.poller.run_cycle().await.unwrap();

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.table("LEDGER").unwrap().fetched, 0);
        assert!(h.dest.log().len() == 1, "empty fetch must not log a load");

        h.source.add_row("LEDGER", ledger_row(2, "B"));
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.inserted(), 1);
        assert_eq!(stored_cursor(&h).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_invalid_rows_are_dropped_not_blocking() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        h.source.add_row("LEDGER", ledger_row(2, " "));
        h.source.add_undecodable("LEDGER", "SQL0802N arithmetic overflow");
        h.source.add_row("LEDGER", ledger_row(3, "C"));

        let report = h.poller.run_cycle().await.unwrap();
        let ledger = report.table("LEDGER").unwrap();
        assert_eq!(ledger.inserted, 2);
        assert_eq!(ledger.dropped, 2);
        assert_eq!(stored_cursor(&h).as_deref(), Some("3"));
        assert_eq!(h.dest.log()[0].records_failed, 2);
    }

    #[tokio::test]
    async fn test_fetch_error_skips_table_and_keeps_cursor() {
        let h = harness();
        seed_cursor(&h, "5");
        h.source.add_row("LEDGER", ledger_row(6, "A"));
        h.source
            .fail_next_fetch(FetchError::query("LEDGER", "SQL0204N undefined name"));

        let report = h.poller.run_cycle().await.unwrap();
        let ledger = report.table("LEDGER").unwrap();
        assert!(ledger.error.as_deref().unwrap().contains("SQL0204N"));
        assert_eq!(stored_cursor(&h).as_deref(), Some("5"));
        assert!(h.dest.rows("bot_ledger").is_empty());
    }

    #[tokio::test]
    async fn test_destination_loss_abandons_cycle() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        h.dest.set_reachable(false);

        let err = h.poller.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Connection(_)));
        assert!(stored_cursor(&h).is_none());

        h.dest.set_reachable(true);
        h.dest
            .fail_next_upsert(ConnectionError::destination("server closed the connection").into());
        let err = h.poller.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Connection(_)));
        assert!(stored_cursor(&h).is_none());

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.inserted(), 1);
    }

    #[tokio::test]
    async fn test_all_rejected_does_not_advance() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        h.dest.fail_next_upsert(LoadError::rejected("bot_ledger", "value too long"));
        h.dest.fail_next_upsert(LoadError::rejected("bot_ledger", "value too long"));

        let report = h.poller.run_cycle().await.unwrap();
        let ledger = report.table("LEDGER").unwrap();
        assert_eq!(ledger.inserted, 0);
        assert_eq!(ledger.failed, 1);
        assert!(ledger.error.as_deref().unwrap().contains("all 1 records rejected"));
        assert!(stored_cursor(&h).is_none());
    }

    #[tokio::test]
    async fn test_source_reconnects_when_probe_fails() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        h.poller.run_cycle().await.unwrap();
        assert_eq!(h.source.connects(), 1);

        h.poller.source.disconnect().await;
        h.poller.run_cycle().await.unwrap();
        assert_eq!(h.source.connects(), 2);
    }

    #[tokio::test]
    async fn test_rows_sharing_an_ordering_value_are_not_skipped() {
        let h = harness_for(&BATCHED_LEDGER, 2);
        for id in 1..=5 {
            h.source.add_row("LEDGER", batched_row(id, 7));
        }

        for _ in 0..5 {
            h.poller.run_cycle().await.unwrap();
        }
        assert_eq!(h.dest.rows("bot_ledger").len(), 5);
        assert_eq!(stored_cursor(&h).as_deref(), Some("7"));
        let limits: Vec<u32> = h.source.queries().iter().map(|q| q.limit).collect();
        assert_eq!(limits, vec![2, 4, 8, 8, 8]);
    }

    #[tokio::test]
    async fn test_full_page_holds_cursor_below_last_value() {
        let h = harness_for(&BATCHED_LEDGER, 2);
        for (id, batch) in [(1, 1), (2, 2), (3, 2), (4, 2), (5, 3)] {
            h.source.add_row("LEDGER", batched_row(id, batch));
        }

        // [1, 2] fills the page; batch 2 may continue past it.
        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.inserted(), 2);
        assert_eq!(stored_cursor(&h).as_deref(), Some("1"));

        // [2, 2] is a single value: no advance, page doubles.
        h.poller.run_cycle().await.unwrap();
        assert_eq!(stored_cursor(&h).as_deref(), Some("1"));

        // [2, 2, 2, 3] fills the larger page.
        h.poller.run_cycle().await.unwrap();
        assert_eq!(stored_cursor(&h).as_deref(), Some("2"));

        let report = h.poller.run_cycle().await.unwrap();
        assert_eq!(report.table("LEDGER").unwrap().fetched, 1);
        assert_eq!(stored_cursor(&h).as_deref(), Some("3"));
        assert_eq!(h.dest.rows("bot_ledger").len(), 5);
    }

    #[tokio::test]
    async fn test_full_page_of_distinct_values_keeps_last_for_next_cycle() {
        let h = harness_for(&LEDGER, 2);
        for id in [1_i64, 2, 3] {
            h.source.add_row("LEDGER", ledger_row(id, "A"));
        }
        h.poller.run_cycle().await.unwrap();
        assert_eq!(stored_cursor(&h).as_deref(), Some("1"));
        h.poller.run_cycle().await.unwrap();
        assert_eq!(stored_cursor(&h).as_deref(), Some("2"));
        h.poller.run_cycle().await.unwrap();
        assert_eq!(stored_cursor(&h).as_deref(), Some("3"));
        assert_eq!(h.dest.rows("bot_ledger").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_initial_backoff() {
        let h = harness();
        h.source.set_reachable(false);
        let control = h.control.clone();
        let metrics = h.metrics.clone();
        let task = tokio::spawn(h.poller.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        control.send(Control::Shutdown).await.unwrap();
        // Without the interrupt the remaining attempts take over 40 minutes.
        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("poller still backing off")
            .unwrap()
            .unwrap();
        assert_eq!(
            metrics.snapshot(&EndpointId::new("mcb"), chrono::Utc::now()).state,
            Some(PollState::Stopped)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_retries_initial_connect_now() {
        let h = harness();
        h.source.set_reachable(false);
        let control = h.control.clone();
        let source = h.source.clone();
        let metrics = h.metrics.clone();
        let task = tokio::spawn(h.poller.run());

        // First attempt failed; the next one is 5s away.
        tokio::time::sleep(Duration::from_secs(1)).await;
        source.set_reachable(true);
        control.send(Control::Restart).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.connects(), 1);
        assert_eq!(metrics.successful_polls(), 1);

        control.send(Control::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_initial_connect_exhaustion() {
        let h = harness();
        h.source.set_reachable(false);
        let err = h.poller.run().await.unwrap_err();
        assert!(matches!(err, PollerError::ConnectExhausted { attempts: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_runtime_failure_and_shuts_down() {
        let h = harness();
        h.source.add_row("LEDGER", ledger_row(1, "A"));
        let control = h.control.clone();
        let metrics = h.metrics.clone();
        let source = h.source.clone();
        let dest = h.dest.clone();
        let task = tokio::spawn(h.poller.run());

        // First cycle succeeds, then the destination goes away.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.successful_polls(), 1);
        dest.set_reachable(false);

        // Next cycle at t=30s fails; recovery waits 60s.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let snap = metrics.snapshot(&EndpointId::new("mcb"), chrono::Utc::now());
        assert_eq!(snap.failed_polls, 1);
        assert_eq!(snap.connection_failures, 1);
        assert_eq!(snap.state, Some(PollState::Sleeping));

        dest.set_reachable(true);
        source.add_row("LEDGER", ledger_row(2, "B"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(metrics.successful_polls(), 2);

        control.send(Control::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(
            metrics.snapshot(&EndpointId::new("mcb"), chrono::Utc::now()).state,
            Some(PollState::Stopped)
        );
        assert_eq!(dest.rows("bot_ledger").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_skips_remaining_sleep() {
        let h = harness();
        let control = h.control.clone();
        let source = h.source.clone();
        let metrics = h.metrics.clone();
        let task = tokio::spawn(h.poller.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.successful_polls(), 1);
        control.send(Control::Restart).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.successful_polls(), 2);
        assert_eq!(source.connects(), 2);

        control.send(Control::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_poll_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(PollState::Recovering).unwrap(),
            serde_json::json!("recovering")
        );
    }
}
