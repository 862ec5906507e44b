//! IBM DB2 source driver.
//!
//! The driver talks to DB2 through ODBC and is only functional when the
//! crate is built with the `odbc` feature. Without it every connection
//! attempt fails with a [`ConnectionError`](regsync_types::error::ConnectionError)
//! naming the missing feature, so the rest of the workspace builds on
//! hosts without the IBM CLI driver.

#![warn(clippy::pedantic)]

pub mod config;
mod session;
pub mod source;

pub use config::Db2Config;
pub use source::Db2Source;
