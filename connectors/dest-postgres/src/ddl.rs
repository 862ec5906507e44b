//! Destination table bootstrap.

use pg_escape::quote_identifier;
use regsync_types::schema::{DestinationTable, SqlType};

pub const PROCESSING_LOG_TABLE: &str = "bot_processing_log";

/// Append-only audit of every table load.
pub const PROCESSING_LOG_DDL: &str = "\
CREATE TABLE IF NOT EXISTS bot_processing_log (
    id BIGSERIAL PRIMARY KEY,
    endpoint_id VARCHAR(100) NOT NULL,
    table_name VARCHAR(100) NOT NULL,
    records_processed BIGINT NOT NULL DEFAULT 0,
    records_failed BIGINT NOT NULL DEFAULT 0,
    processing_time_ms BIGINT NOT NULL DEFAULT 0,
    error_message TEXT,
    processed_at TIMESTAMP NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_bot_processing_log_endpoint
    ON bot_processing_log (endpoint_id, processed_at);";

/// Advisory lock name held while DDL runs, so two processes starting
/// together do not race on `CREATE TABLE IF NOT EXISTS`.
pub(crate) const DDL_LOCK: &str = "regsync_ddl";

pub(crate) fn pg_type(sql_type: SqlType) -> String {
    match sql_type {
        SqlType::Varchar(n) => format!("VARCHAR({n})"),
        SqlType::Text => "TEXT".into(),
        SqlType::Integer => "INTEGER".into(),
        SqlType::BigInt => "BIGINT".into(),
        SqlType::Double => "DOUBLE PRECISION".into(),
        SqlType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
        SqlType::Numeric => "NUMERIC".into(),
        SqlType::Timestamp => "TIMESTAMP".into(),
        SqlType::Boolean => "BOOLEAN".into(),
        SqlType::Jsonb => "JSONB".into(),
    }
}

/// Statements creating `table` and its indexes, in execution order.
///
/// Every table gets a surrogate `id`, the `endpoint_id` column, the data
/// columns, `created_at`/`updated_at`, and a unique constraint on
/// `(endpoint_id, natural key...)` that backs the upsert.
#[must_use]
pub fn create_table_statements(table: &DestinationTable) -> Vec<String> {
    let name = quote_identifier(&table.name);

    let mut parts = vec![
        "id BIGSERIAL PRIMARY KEY".to_string(),
        "endpoint_id VARCHAR(100) NOT NULL".to_string(),
    ];
    parts.extend(table.columns.iter().map(|col| {
        let nullable = if col.nullable { "" } else { " NOT NULL" };
        format!(
            "{} {}{nullable}",
            quote_identifier(&col.name),
            pg_type(col.sql_type)
        )
    }));
    parts.push("created_at TIMESTAMP NOT NULL DEFAULT now()".into());
    parts.push("updated_at TIMESTAMP NOT NULL DEFAULT now()".into());

    let key = std::iter::once("endpoint_id".into())
        .chain(table.natural_key.iter().map(|k| quote_identifier(k)))
        .collect::<Vec<_>>()
        .join(", ");
    parts.push(format!("UNIQUE ({key})"));

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {name} (\n    {}\n)",
        parts.join(",\n    ")
    )];
    statements.push(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {name} (endpoint_id)",
        quote_identifier(&format!("idx_{}_endpoint", table.name))
    ));
    for col in &table.indexed {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {name} ({})",
            quote_identifier(&format!("idx_{}_{col}", table.name)),
            quote_identifier(col)
        ));
    }
    statements
}
