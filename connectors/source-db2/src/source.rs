//! [`SourceDriver`] implementation for DB2.

use regsync_types::connector::{Dialect, SourceDriver, SourceQuery};
use regsync_types::error::{ConnectionError, FetchError};
use regsync_types::record::RowEvent;

use crate::config::Db2Config;
use crate::session::Session;

/// Blocking DB2 driver. Every value is read as text; the transformer does
/// the typing.
pub struct Db2Source {
    config: Db2Config,
    session: Option<Session>,
}

impl Db2Source {
    #[must_use]
    pub fn new(config: Db2Config) -> Self {
        Self {
            config,
            session: None,
        }
    }
}

impl SourceDriver for Db2Source {
    fn dialect(&self) -> Dialect {
        Dialect::Db2
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.session = None;
        let session = Session::connect(&self.config.connection_string())?;
        tracing::info!(target_db = %self.config.display_target(), "Connected to DB2");
        self.session = Some(session);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn probe(&mut self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.probe(Dialect::Db2.probe_sql()))
    }

    fn fetch(&mut self, query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ConnectionError::source("not connected").into());
        };
        let result = session.fetch(query);
        if matches!(result, Err(FetchError::Connection(_))) {
            self.session = None;
        }
        result
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(target_db = %self.config.display_target(), "DB2 connection closed");
        }
    }
}
