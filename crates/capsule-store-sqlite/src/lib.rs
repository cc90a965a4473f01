//! SQLite backend for the capsule store.
//!
//! Implements [`capsule_core::kv::KeyValueStore`] over a single `kv` table,
//! wrapping [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime.

mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
