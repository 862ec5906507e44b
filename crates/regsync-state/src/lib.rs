//! Cursor persistence for the regsync polling engine.
//!
//! Provides the [`CursorStore`] trait with a `PostgreSQL` backend that
//! shares the reporting database and a `SQLite` backend for single-host
//! deployments and tests.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use crate::backend::CursorStore;
pub use crate::error::StateError;
pub use crate::postgres::PostgresCursorStore;
pub use crate::sqlite::SqliteCursorStore;
