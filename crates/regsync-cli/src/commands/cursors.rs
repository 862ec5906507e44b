use std::path::Path;

use anyhow::{Context, Result};
use regsync_engine::TableRegistry;
use regsync_types::state::{CursorState, EndpointId, TableName};

use crate::wiring;

struct CursorRow {
    endpoint: EndpointId,
    table: TableName,
    ordering_column: String,
    state: Option<CursorState>,
}

/// Execute the `cursors` command: print the stored position of every
/// configured (endpoint, table) pair.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = wiring::load_config(config_path)?;
    let registry = TableRegistry::builtin();

    let pairs: Vec<(EndpointId, TableName, String)> = config
        .endpoints
        .iter()
        .flat_map(|ep| {
            ep.table_names().into_iter().map(|table| {
                let column = registry.resolve(&table).ordering_column().to_string();
                (ep.endpoint_id(), table, column)
            })
        })
        .collect();

    let store = wiring::open_store(&config).await?;
    let reader = std::sync::Arc::clone(&store);
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<CursorRow>> {
        pairs
            .into_iter()
            .map(|(endpoint, table, ordering_column)| {
                let state = reader.get_cursor(&endpoint, &table).with_context(|| {
                    format!("Failed to read cursor {}/{}", endpoint.as_str(), table.as_str())
                })?;
                Ok(CursorRow {
                    endpoint,
                    table,
                    ordering_column,
                    state,
                })
            })
            .collect()
    })
    .await
    .context("Cursor read task panicked")?;
    wiring::close_store(store).await;

    for row in rows? {
        print_row(&row);
    }
    Ok(())
}

fn print_row(row: &CursorRow) {
    let key = format!("{}/{}", row.endpoint.as_str(), row.table.as_str());
    match &row.state {
        Some(state) => println!(
            "{key:40} {}={} (updated {})",
            state.cursor_field.as_deref().unwrap_or(&row.ordering_column),
            state.cursor_value.as_deref().unwrap_or("-"),
            state.updated_at
        ),
        None => println!("{key:40} {}=(none)", row.ordering_column),
    }
}
