//! The `KeyValueStore` trait and an in-memory implementation.
//!
//! Capsule data lives as a handful of serialized blobs under fixed string
//! keys, the way a browser keeps it in `localStorage`. Backends only move
//! opaque strings; all encoding happens in [`crate::store`] and
//! [`crate::trash`].

use std::{
  collections::HashMap,
  convert::Infallible,
  future::Future,
  sync::{Mutex, PoisonError},
};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a string key-value backend.
///
/// All methods return `Send` futures so controllers built on a backend can
/// spawn timer tasks on a multi-threaded tokio runtime.
pub trait KeyValueStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the value stored under `key`. Returns `None` if absent.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  /// Store `value` under `key`, replacing any previous value.
  fn set<'a>(
    &'a self,
    key: &'a str,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete `key`. Deleting an absent key is not an error.
  fn remove<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

/// A process-local backend. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
    let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
  }
}

impl KeyValueStore for MemoryStore {
  type Error = Infallible;

  async fn get(&self, key: &str) -> Result<Option<String>, Infallible> {
    Ok(self.with_entries(|m| m.get(key).cloned()))
  }

  async fn set(&self, key: &str, value: String) -> Result<(), Infallible> {
    self.with_entries(|m| m.insert(key.to_owned(), value));
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), Infallible> {
    self.with_entries(|m| m.remove(key));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn set_get_remove() {
    let kv = MemoryStore::new();
    assert_eq!(kv.get("a").await.unwrap(), None);

    kv.set("a", "1".into()).await.unwrap();
    kv.set("a", "2".into()).await.unwrap();
    assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));

    kv.remove("a").await.unwrap();
    kv.remove("a").await.unwrap();
    assert_eq!(kv.get("a").await.unwrap(), None);
  }
}
