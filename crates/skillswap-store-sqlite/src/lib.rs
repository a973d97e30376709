//! SQLite backend for SkillSwap.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Committed writes to the record tables
//! are published on an in-process change feed, so [`SqliteStore`] can stand
//! in for the hosted backend's realtime channel.

mod encode;
mod query;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
