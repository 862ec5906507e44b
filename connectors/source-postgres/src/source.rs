//! [`SourceDriver`] implementation over the sync `postgres` client.

use postgres::types::Type;
use postgres::{Client, NoTls, Statement};
use regsync_types::connector::{Dialect, SourceDriver, SourceQuery};
use regsync_types::error::{ConnectionError, FetchError};
use regsync_types::record::RowEvent;

use crate::config::Config;
use crate::types::{decode_row, text_cast_sql, CursorParam};

pub struct PostgresSource {
    client_config: postgres::Config,
    target: String,
    client: Option<Client>,
}

impl PostgresSource {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client_config: config.client_config(),
            target: config.display_target(),
            client: None,
        }
    }

    /// Build from a libpq-style connection string or `postgresql://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the string does not parse.
    pub fn from_url(url: &str) -> Result<Self, ConnectionError> {
        let client_config: postgres::Config = url
            .parse()
            .map_err(|e| ConnectionError::source(format!("invalid connection string: {e}")))?;
        Ok(Self {
            client_config,
            target: "postgres".into(),
            client: None,
        })
    }
}

impl SourceDriver for PostgresSource {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.client = None;
        let client = self
            .client_config
            .connect(NoTls)
            .map_err(|e| ConnectionError::source(format!("Connection failed: {e}")))?;
        tracing::info!(target_db = %self.target, "Connected to PostgreSQL source");
        self.client = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    fn probe(&mut self) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        match client.query_one(Dialect::Postgres.probe_sql(), &[]) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "PostgreSQL source probe failed");
                false
            }
        }
    }

    fn fetch(&mut self, query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
        let Some(client) = self.client.as_mut() else {
            return Err(ConnectionError::source("not connected").into());
        };
        let table = query.table.as_str();

        let result = prepare_page(client, query).and_then(|stmt| {
            let param = CursorParam::for_placeholder(&query.cursor, stmt.params().first())
                .map_err(|msg| FetchError::query(table, msg))?;
            client
                .query(&stmt, &[param.as_sql()])
                .map_err(|e| classify(table, &e, client.is_closed()))
        });

        match result {
            Ok(rows) => Ok(rows
                .iter()
                .enumerate()
                .map(|(position, row)| decode_row(row, position))
                .collect()),
            Err(err) => {
                if err.is_connection() {
                    self.client = None;
                }
                Err(err)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!(target_db = %self.target, "PostgreSQL source connection closed");
        }
    }
}

/// Prepare the page query, re-preparing it with text casts when the result
/// has columns [`decode_row`] cannot read natively.
fn prepare_page(client: &mut Client, query: &SourceQuery) -> Result<Statement, FetchError> {
    let table = query.table.as_str();
    let stmt = client
        .prepare(&query.sql)
        .map_err(|e| classify(table, &e, client.is_closed()))?;
    let columns: Vec<(&str, &Type)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name(), c.type_()))
        .collect();
    match text_cast_sql(query, &columns) {
        None => Ok(stmt),
        Some(sql) => {
            tracing::debug!(table, "Casting non-native columns to text: {sql}");
            client
                .prepare(&sql)
                .map_err(|e| classify(table, &e, client.is_closed()))
        }
    }
}

/// SQLSTATE class 08 and the 57P0x shutdown codes mean the session is gone.
fn classify(table: &str, err: &postgres::Error, client_closed: bool) -> FetchError {
    let lost_code = err
        .code()
        .is_some_and(|c| c.code().starts_with("08") || c.code().starts_with("57P0"));
    if client_closed || err.is_closed() || lost_code {
        FetchError::Connection(ConnectionError::source(err.to_string()))
    } else {
        FetchError::query(table, format_pg_error(err))
    }
}

fn format_pg_error(err: &postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({}): {detail}", db.message(), db.code().code()),
            None => format!("{} ({})", db.message(), db.code().code()),
        },
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsync_types::cursor::CursorValue;
    use regsync_types::record::RawValue;
    use regsync_types::state::TableName;

    #[test]
    fn test_unconnected_driver() {
        let mut src = PostgresSource::from_url("host=localhost user=u dbname=core").unwrap();
        assert!(!src.is_connected());
        assert!(!src.probe());
        let query = SourceQuery::build(
            Dialect::Postgres,
            "public",
            &TableName::new("LOANS"),
            None,
            "entryid",
            &CursorValue::Int64 { value: 0 },
            10,
        );
        assert!(src.fetch(&query).unwrap_err().is_connection());
        src.disconnect();
    }

    #[test]
    fn test_bad_connection_string() {
        assert!(PostgresSource::from_url("host=a port=notaport").is_err());
    }

    fn test_url() -> String {
        std::env::var("TEST_POSTGRES_URL")
            .unwrap_or_else(|_| "host=localhost user=postgres dbname=postgres".into())
    }

    #[test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    fn fetch_after_cursor_in_order() {
        let mut admin = Client::connect(&test_url(), NoTls).unwrap();
        admin
            .batch_execute(
                "DROP TABLE IF EXISTS public.regsync_src_ledger;
                 CREATE TABLE public.regsync_src_ledger (
                     entryid BIGINT, amount NUMERIC(12,2), note VARCHAR(20), bookedat TIMESTAMP);
                 INSERT INTO public.regsync_src_ledger VALUES
                     (100, 12.50, 'a', '2023-03-01 14:30'),
                     (101, NULL, 'b', '2023-03-01 14:31'),
                     (99, 1, 'old', '2023-03-01 14:29'),
                     (102, -0.05, NULL, '2023-03-01 14:32');",
            )
            .unwrap();

        let mut src = PostgresSource::from_url(&test_url()).unwrap();
        src.connect().unwrap();
        assert!(src.probe());

        let query = SourceQuery::build(
            Dialect::Postgres,
            "public",
            &TableName::new("regsync_src_ledger"),
            None,
            "entryid",
            &CursorValue::Int64 { value: 99 },
            2,
        );
        let events = src.fetch(&query).unwrap();
        assert_eq!(events.len(), 2);
        let RowEvent::Row(first) = &events[0] else {
            panic!("expected row, got {:?}", events[0]);
        };
        assert_eq!(first.get("entryid"), Some(&RawValue::Int(100)));
        // NUMERIC arrives through the text cast, exact.
        assert_eq!(first.get("amount"), Some(&RawValue::Text("12.50".into())));
        let RowEvent::Row(second) = &events[1] else {
            panic!("expected row, got {:?}", events[1]);
        };
        assert_eq!(second.get("amount"), Some(&RawValue::Null));

        let err = src
            .fetch(&SourceQuery {
                sql: "SELECT * FROM public.regsync_missing WHERE entryid > $1".into(),
                ..query
            })
            .unwrap_err();
        assert!(!err.is_connection(), "{err}");

        admin
            .batch_execute("DROP TABLE public.regsync_src_ledger")
            .unwrap();
    }
}
