//! Database module for PingWatch.
//!
//! Provides append-only SQLite storage of samples with embedded migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
