//! Bounded batch upserts with row-level fallback.

use std::sync::Arc;
use std::time::Instant;

use regsync_types::connector::{Destination, ProcessingLogEntry};
use regsync_types::cursor::CursorValue;
use regsync_types::error::LoadError;
use regsync_types::record::CanonicalRecord;
use regsync_types::schema::DestinationTable;
use regsync_types::state::{EndpointId, TableName};

/// Outcome of loading one table's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub inserted: u64,
    pub failed: u64,
    /// Greatest ordering value among inserted records.
    pub max_loaded: Option<CursorValue>,
    pub duration_ms: u64,
}

impl LoadReport {
    fn note_inserted(&mut self, records: &[CanonicalRecord]) {
        self.inserted += records.len() as u64;
        for rec in records {
            if self
                .max_loaded
                .as_ref()
                .map_or(true, |max| rec.ordering.is_after(max))
            {
                self.max_loaded = Some(rec.ordering.clone());
            }
        }
    }
}

/// Upserts canonical records in chunks of `batch_size`.
#[derive(Clone)]
pub struct BatchLoader {
    dest: Arc<dyn Destination>,
    batch_size: usize,
}

impl BatchLoader {
    #[must_use]
    pub fn new(dest: Arc<dyn Destination>, batch_size: usize) -> Self {
        Self {
            dest,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.dest
    }

    /// Load `records` into `table`.
    ///
    /// A rejected chunk is retried row by row; rows failing both ways are
    /// counted in [`LoadReport::failed`] and dropped.
    ///
    /// # Errors
    ///
    /// Returns a connection-class [`LoadError`] as soon as one occurs, and
    /// [`LoadError::AllRejected`] when a non-empty input inserted nothing.
    pub async fn load(
        &self,
        endpoint: &EndpointId,
        table: &DestinationTable,
        records: &[CanonicalRecord],
    ) -> Result<LoadReport, LoadError> {
        let started = Instant::now();
        let mut report = LoadReport::default();

        for chunk in records.chunks(self.batch_size) {
            match self.dest.upsert_batch(endpoint, table, chunk).await {
                Ok(_) => report.note_inserted(chunk),
                Err(err) if err.is_connection() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        endpoint = endpoint.as_str(),
                        table = table.name,
                        chunk_size = chunk.len(),
                        error = %err,
                        "Batch upsert rejected, falling back to row-by-row"
                    );
                    self.load_rows(endpoint, table, chunk, &mut report).await?;
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if !records.is_empty() && report.inserted == 0 {
            return Err(LoadError::AllRejected {
                table: table.name.clone(),
                attempted: records.len(),
            });
        }
        Ok(report)
    }

    async fn load_rows(
        &self,
        endpoint: &EndpointId,
        table: &DestinationTable,
        chunk: &[CanonicalRecord],
        report: &mut LoadReport,
    ) -> Result<(), LoadError> {
        for rec in chunk {
            let single = std::slice::from_ref(rec);
            match self.dest.upsert_batch(endpoint, table, single).await {
                Ok(_) => report.note_inserted(single),
                Err(err) if err.is_connection() => return Err(err),
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        endpoint = endpoint.as_str(),
                        table = table.name,
                        ordering = %rec.ordering,
                        error = %err,
                        "Row upsert failed, record dropped"
                    );
                }
            }
        }
        Ok(())
    }

    /// Append the processing-log row for one table load. Failures are
    /// logged and swallowed.
    pub async fn log_outcome(
        &self,
        endpoint: &EndpointId,
        table: &TableName,
        processed: u64,
        failed: u64,
        processing_time_ms: u64,
        error_message: Option<String>,
    ) {
        let entry = ProcessingLogEntry {
            endpoint_id: endpoint.clone(),
            table_name: table.clone(),
            records_processed: processed,
            records_failed: failed,
            processing_time_ms,
            error_message,
        };
        if let Err(err) = self.dest.append_processing_log(&entry).await {
            tracing::warn!(
                endpoint = endpoint.as_str(),
                table = table.as_str(),
                error = %err,
                "Failed to append processing log"
            );
        }
    }
}

impl std::fmt::Debug for BatchLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
