//! Sync config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::SyncConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a sync config YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<SyncConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: SyncConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse sync config YAML")?;
    Ok(config)
}

/// Parse a sync config YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SourceKind;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("RS_TEST_HOST", "db2.example.com");
        let input = "host: ${RS_TEST_HOST}\nport: 50000";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("db2.example.com"));
        assert!(!result.contains("${RS_TEST_HOST}"));
        std::env::remove_var("RS_TEST_HOST");
    }

    #[test]
    fn test_repeated_env_var() {
        std::env::set_var("RS_TEST_REPEAT", "x");
        let result = substitute_env_vars("${RS_TEST_REPEAT}-${RS_TEST_REPEAT}").unwrap();
        assert_eq!(result, "x-x");
        std::env::remove_var("RS_TEST_REPEAT");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "host: localhost\nport: 5432";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${RS_MISSING_X} and ${RS_MISSING_Y}";
        let err_msg = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err_msg.contains("RS_MISSING_X"));
        assert!(err_msg.contains("RS_MISSING_Y"));
    }

    #[test]
    fn test_parse_config_from_string() {
        std::env::set_var("RS_TEST_DB2_PASS", "secret");
        let yaml = r#"
version: "1.0"
destination:
  connection: "host=localhost dbname=bot_db user=postgres"
  max_pool_size: 20
endpoints:
  - id: mcb-core
    source:
      kind: db2
      host: db2.local
      port: 50001
      database: CORE
      user: reader
      password: ${RS_TEST_DB2_PASS}
    tables:
      - PERSONAL_DATA_INDIVIDUALS
      - ASSET_OWNED_OR_ACQUIRED
    poll_interval_secs: 60
"#;
        let config = parse_config_str(yaml).unwrap();
        let ep = &config.endpoints[0];
        assert_eq!(ep.source.password, "secret");
        assert_eq!(ep.source.kind, SourceKind::Db2);
        assert_eq!(ep.source.port(), 50001);
        assert_eq!(ep.tables.len(), 2);
        assert_eq!(ep.poll_interval_secs, 60);
        assert_eq!(config.destination.max_pool_size, 20);
        std::env::remove_var("RS_TEST_DB2_PASS");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regsync.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\ndestination:\n  connection: x\nendpoints: []\n",
        )
        .unwrap();
        let config = parse_config(&path).unwrap();
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_parse_missing_file_names_path() {
        let err = parse_config(Path::new("/nonexistent/regsync.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/regsync.yaml"));
    }
}
