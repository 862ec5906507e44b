//! Semantic validation for parsed sync configuration values.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::{StateBackendKind, SyncConfig};

/// Identifiers are spliced into SQL text, so only plain names pass.
static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const MIN_POOL_SIZE: usize = 5;
const MAX_POOL_SIZE: usize = 20;

#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// Validate a parsed sync configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &SyncConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.destination.connection.trim().is_empty() {
        errors.push("destination.connection must not be empty".to_string());
    }
    if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&config.destination.max_pool_size) {
        errors.push(format!(
            "destination.max_pool_size must be between {MIN_POOL_SIZE} and {MAX_POOL_SIZE}, got {}",
            config.destination.max_pool_size
        ));
    }
    if config.destination.insert_batch_size == 0 {
        errors.push("destination.insert_batch_size must be at least 1".to_string());
    }
    if config.destination.statement_timeout_secs == 0 {
        errors.push("destination.statement_timeout_secs must be > 0".to_string());
    }
    if config.destination.probe_timeout_ms == 0 {
        errors.push("destination.probe_timeout_ms must be > 0".to_string());
    }

    if config.state.backend == StateBackendKind::Sqlite && config.state.path.is_none() {
        errors.push("state.path is required for the sqlite backend".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }

    if config.endpoints.is_empty() {
        errors.push("At least one endpoint must be configured".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (i, ep) in config.endpoints.iter().enumerate() {
        if ep.id.trim().is_empty() {
            errors.push(format!("Endpoint {i} has an empty id"));
        } else if !seen_ids.insert(ep.id.as_str()) {
            errors.push(format!("Duplicate endpoint id '{}'", ep.id));
        }
        let ctx = format!("Endpoint '{}'", ep.id);

        if ep.source.host.trim().is_empty() {
            errors.push(format!("{ctx}: source.host must not be empty"));
        }
        if ep.source.database.trim().is_empty() {
            errors.push(format!("{ctx}: source.database must not be empty"));
        }
        if !is_valid_identifier(&ep.source.schema) {
            errors.push(format!(
                "{ctx}: invalid source.schema '{}'",
                ep.source.schema
            ));
        }
        if ep.fetch_batch_size == 0 {
            errors.push(format!("{ctx}: fetch_batch_size must be at least 1"));
        }
        if ep.poll_interval_secs == 0 {
            errors.push(format!("{ctx}: poll_interval_secs must be > 0"));
        }
        if ep.tables.is_empty() {
            errors.push(format!("{ctx}: must monitor at least one table"));
        }

        let mut seen_tables = HashSet::new();
        for table in &ep.tables {
            if !is_valid_identifier(table) {
                errors.push(format!("{ctx}: invalid table name '{table}'"));
            }
            if !seen_tables.insert(table.to_ascii_uppercase()) {
                errors.push(format!("{ctx}: table '{table}' listed more than once"));
            }
        }
    }

    if !errors.is_empty() {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}
