//! One ODBC session with a DB2 server.

#[cfg(feature = "odbc")]
pub(crate) use odbc_session::Session;
#[cfg(not(feature = "odbc"))]
pub(crate) use unavailable::Session;

#[cfg(feature = "odbc")]
mod odbc_session {
    use odbc_api::{
        Connection, ConnectionOptions, Cursor, CursorRow, Environment, IntoParameter,
        ResultSetMetadata,
    };
    use once_cell::sync::OnceCell;
    use regsync_types::connector::SourceQuery;
    use regsync_types::error::{ConnectionError, FetchError};
    use regsync_types::record::{RawRow, RawValue, RowEvent};

    /// The driver manager environment is process-wide and must outlive
    /// every connection.
    static ENV: OnceCell<Environment> = OnceCell::new();

    fn environment() -> Result<&'static Environment, odbc_api::Error> {
        ENV.get_or_try_init(Environment::new)
    }

    pub(crate) struct Session {
        conn: Connection<'static>,
    }

    impl Session {
        pub(crate) fn connect(connection_string: &str) -> Result<Self, ConnectionError> {
            let env = environment()
                .map_err(|e| ConnectionError::source(format!("ODBC environment: {e}")))?;
            let conn = env
                .connect_with_connection_string(connection_string, ConnectionOptions::default())
                .map_err(|e| ConnectionError::source(e.to_string()))?;
            Ok(Self { conn })
        }

        pub(crate) fn probe(&self, sql: &str) -> bool {
            match self.conn.execute(sql, ()) {
                Ok(Some(mut cursor)) => matches!(cursor.next_row(), Ok(Some(_))),
                Ok(None) => false,
                Err(err) => {
                    tracing::debug!(error = %err, "DB2 probe failed");
                    false
                }
            }
        }

        pub(crate) fn fetch(&self, query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
            let table = query.table.as_str();
            let cursor_text = query.cursor.encode();
            let param = cursor_text.as_str().into_parameter();

            let mut cursor = match self.conn.execute(&query.sql, &param) {
                Ok(Some(cursor)) => cursor,
                Ok(None) => return Ok(Vec::new()),
                Err(err) => return Err(classify(table, &err)),
            };

            let count = cursor.num_result_cols().map_err(|e| classify(table, &e))?;
            let mut names = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
            for col in 1..=u16::try_from(count).unwrap_or(0) {
                names.push(cursor.col_name(col).map_err(|e| classify(table, &e))?);
            }

            let mut events = Vec::new();
            let mut buf = Vec::new();
            loop {
                let mut row = match cursor.next_row() {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(err) => return Err(classify(table, &err)),
                };
                let position = events.len();
                events.push(decode_row(&mut row, &names, &mut buf, position));
            }
            Ok(events)
        }
    }

    fn decode_row(
        row: &mut CursorRow<'_>,
        names: &[String],
        buf: &mut Vec<u8>,
        position: usize,
    ) -> RowEvent {
        let mut raw = RawRow::with_capacity(names.len());
        for (col, name) in (1u16..).zip(names) {
            match row.get_text(col, buf) {
                Ok(false) => raw.push(name.clone(), RawValue::Null),
                Ok(true) => match std::str::from_utf8(buf) {
                    Ok(text) => raw.push(name.clone(), RawValue::Text(text.to_string())),
                    Err(_) => {
                        return RowEvent::Undecodable {
                            position,
                            reason: format!("column {name} is not valid UTF-8"),
                        }
                    }
                },
                Err(err) => {
                    return RowEvent::Undecodable {
                        position,
                        reason: format!("column {name}: {err}"),
                    }
                }
            }
        }
        RowEvent::Row(raw)
    }

    /// SQLSTATE class 08 (connection exception) and 40003 (statement
    /// completion unknown) mean the session is gone.
    fn classify(table: &str, err: &odbc_api::Error) -> FetchError {
        let lost = match err {
            odbc_api::Error::Diagnostics { record, .. } => {
                let state = record.state.as_str();
                state.starts_with("08") || state == "40003"
            }
            _ => false,
        };
        if lost {
            FetchError::Connection(ConnectionError::source(err.to_string()))
        } else {
            FetchError::query(table, err.to_string())
        }
    }
}

#[cfg(not(feature = "odbc"))]
mod unavailable {
    use regsync_types::connector::SourceQuery;
    use regsync_types::error::{ConnectionError, FetchError};
    use regsync_types::record::RowEvent;

    /// Uninhabited: a session can never be opened without ODBC.
    pub(crate) enum Session {}

    impl Session {
        pub(crate) fn connect(_connection_string: &str) -> Result<Self, ConnectionError> {
            Err(ConnectionError::source(
                "DB2 support is not compiled in; rebuild with the `odbc` feature",
            ))
        }

        pub(crate) fn probe(&self, _sql: &str) -> bool {
            match *self {}
        }

        pub(crate) fn fetch(&self, _query: &SourceQuery) -> Result<Vec<RowEvent>, FetchError> {
            match *self {}
        }
    }
}
