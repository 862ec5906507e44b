//! Shared model types for the regsync polling engine.
//!
//! Kept dependency-light so the state crate, the engine and every
//! connector can agree on ids, cursor positions, records and errors
//! without depending on each other.

#![warn(clippy::pedantic)]

pub mod connector;
pub mod cursor;
pub mod error;
pub mod record;
pub mod schema;
pub mod state;
pub mod timefmt;
