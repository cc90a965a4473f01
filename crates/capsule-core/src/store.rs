//! [`CapsuleStore`] — the capsule collection on top of a [`KeyValueStore`].
//!
//! The whole collection is one JSON array under a single key. Every mutation
//! reads the array, edits it in memory and writes it back in full; expected
//! collections are personal-sized (dozens to hundreds of records).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
  Error, Result,
  capsule::{Capsule, CapsuleId},
  kv::KeyValueStore,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The capsule collection.
///
/// Cloning is cheap; clones share the backend and the write lock.
pub struct CapsuleStore<B> {
  kv:         Arc<B>,
  key:        String,
  write_lock: Arc<Mutex<()>>,
}

impl<B> Clone for CapsuleStore<B> {
  fn clone(&self) -> Self {
    Self {
      kv:         Arc::clone(&self.kv),
      key:        self.key.clone(),
      write_lock: Arc::clone(&self.write_lock),
    }
  }
}

impl<B: KeyValueStore> CapsuleStore<B> {
  pub fn new(kv: Arc<B>, key: impl Into<String>) -> Self {
    Self { kv, key: key.into(), write_lock: Arc::new(Mutex::new(())) }
  }

  pub fn backend(&self) -> &Arc<B> { &self.kv }

  // ── Reads ───────────────────────────────────────────────────────────────

  /// The full collection in storage order.
  ///
  /// Never fails: an absent key, a malformed blob or a backend read error all
  /// yield an empty collection, and the latter two are logged.
  pub async fn get_all(&self) -> Vec<Capsule> {
    match self.load().await {
      Ok(capsules) => capsules,
      Err(e) => {
        tracing::warn!(key = %self.key, error = %e, "failed to read capsules");
        Vec::new()
      }
    }
  }

  pub async fn get_by_id(&self, id: &CapsuleId) -> Option<Capsule> {
    self.get_all().await.into_iter().find(|c| &c.id == id)
  }

  /// Capsules not yet opened.
  pub async fn get_pending(&self) -> Vec<Capsule> {
    let mut all = self.get_all().await;
    all.retain(|c| !c.is_opened);
    all
  }

  pub async fn get_opened(&self) -> Vec<Capsule> {
    let mut all = self.get_all().await;
    all.retain(|c| c.is_opened);
    all
  }

  // ── Writes ──────────────────────────────────────────────────────────────

  /// Append a new capsule. Fails with [`Error::DuplicateId`] if the id is
  /// already in the collection.
  ///
  /// Unlike the reads, writes surface failures: a backend error comes back
  /// as [`Error::Backend`] and an unencodable collection as
  /// [`Error::Serialization`].
  pub async fn save(&self, capsule: Capsule) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let mut all = self.load().await?;
    if all.iter().any(|c| c.id == capsule.id) {
      return Err(Error::DuplicateId(capsule.id));
    }
    all.push(capsule);
    self.write(&all).await
  }

  /// Replace the record with a matching id. No-op if there is none.
  ///
  /// Returns [`Error::Backend`] or [`Error::Serialization`] if the
  /// collection cannot be written.
  pub async fn update(&self, capsule: Capsule) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let mut all = self.load().await?;
    let Some(slot) = all.iter_mut().find(|c| c.id == capsule.id) else {
      tracing::debug!(id = %capsule.id, "update of unknown capsule ignored");
      return Ok(());
    };
    *slot = capsule;
    self.write(&all).await
  }

  /// Drop the record with a matching id. No-op if there is none.
  ///
  /// Returns [`Error::Backend`] or [`Error::Serialization`] if the
  /// collection cannot be written.
  pub async fn remove(&self, id: &CapsuleId) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let mut all = self.load().await?;
    let before = all.len();
    all.retain(|c| &c.id != id);
    if all.len() == before {
      return Ok(());
    }
    self.write(&all).await
  }

  /// Delete the whole collection.
  pub async fn clear(&self) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    self.kv.remove(&self.key).await.map_err(Error::backend)
  }

  // ── Encoding ────────────────────────────────────────────────────────────

  /// Read and decode the collection.
  ///
  /// A malformed blob is logged and treated as empty so the next write
  /// replaces it; backend failures propagate.
  async fn load(&self) -> Result<Vec<Capsule>> {
    let Some(raw) = self.kv.get(&self.key).await.map_err(Error::backend)? else {
      return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
      Ok(capsules) => Ok(capsules),
      Err(e) => {
        tracing::warn!(
          key = %self.key,
          error = %e,
          "capsule collection is malformed; treating as empty",
        );
        Ok(Vec::new())
      }
    }
  }

  async fn write(&self, capsules: &[Capsule]) -> Result<()> {
    let raw = serde_json::to_string(capsules)?;
    self.kv.set(&self.key, raw).await.map_err(Error::backend)
  }
}
