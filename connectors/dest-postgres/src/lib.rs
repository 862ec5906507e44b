//! `PostgreSQL` destination: pooled multi-row upserts into the reporting
//! database, table bootstrap and the processing log.

#![warn(clippy::pedantic)]

pub mod config;
pub mod ddl;
pub mod error;
pub mod insert;
pub mod sink;

pub use config::PoolSettings;
pub use sink::PostgresDestination;
