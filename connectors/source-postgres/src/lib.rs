//! Blocking `PostgreSQL` source driver.
//!
//! Reads the core-banking schema from a `PostgreSQL` replica using the sync
//! `postgres` client. Column values are decoded by their declared type;
//! types without a native decoder (`NUMERIC` among them) are cast to text
//! by the server.

#![warn(clippy::pedantic)]

pub mod config;
pub mod source;
pub mod types;

pub use config::Config;
pub use source::PostgresSource;
