//! Sync configuration: YAML model, parsing and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::{
    DestinationConfig, EndpointConfig, RetryConfig, SourceConfig, SourceKind, StateBackendKind,
    StateConfig, SyncConfig,
};
pub use validator::validate_config;
