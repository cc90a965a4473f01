//! The trash — durable snapshots of capsules inside their undo window.
//!
//! One JSON object keyed by capsule id lives under a key of its own, so a
//! soft delete survives a restart of the process that issued it.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  capsule::{Capsule, CapsuleId},
  kv::KeyValueStore,
};

/// Which view a capsule was deleted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
  Pending,
  Opened,
}

impl Origin {
  pub fn of(capsule: &Capsule) -> Self {
    if capsule.is_opened { Self::Opened } else { Self::Pending }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
  pub capsule:    Capsule,
  pub origin:     Origin,
  pub deleted_at: DateTime<Utc>,
}

pub struct Trash<B> {
  kv:  Arc<B>,
  key: String,
}

impl<B: KeyValueStore> Trash<B> {
  pub fn new(kv: Arc<B>, key: impl Into<String>) -> Self {
    Self { kv, key: key.into() }
  }

  /// Every entry, keyed by id. Unreadable data yields an empty map.
  pub async fn entries(&self) -> BTreeMap<CapsuleId, TrashEntry> {
    match self.load().await {
      Ok(map) => map,
      Err(e) => {
        tracing::warn!(key = %self.key, error = %e, "failed to read trash");
        BTreeMap::new()
      }
    }
  }

  pub async fn get(&self, id: &CapsuleId) -> Option<TrashEntry> {
    self.entries().await.remove(id)
  }

  pub async fn stash(&self, entry: TrashEntry) -> Result<()> {
    let mut map = self.load().await?;
    map.insert(entry.capsule.id.clone(), entry);
    self.write(&map).await
  }

  /// Forget the entry for `id`. No-op if there is none.
  pub async fn clear(&self, id: &CapsuleId) -> Result<()> {
    let mut map = self.load().await?;
    if map.remove(id).is_none() {
      return Ok(());
    }
    self.write(&map).await
  }

  async fn load(&self) -> Result<BTreeMap<CapsuleId, TrashEntry>> {
    let Some(raw) = self.kv.get(&self.key).await.map_err(Error::backend)? else {
      return Ok(BTreeMap::new());
    };
    match serde_json::from_str(&raw) {
      Ok(map) => Ok(map),
      Err(e) => {
        tracing::warn!(
          key = %self.key,
          error = %e,
          "trash is malformed; treating as empty",
        );
        Ok(BTreeMap::new())
      }
    }
  }

  async fn write(&self, map: &BTreeMap<CapsuleId, TrashEntry>) -> Result<()> {
    if map.is_empty() {
      return self.kv.remove(&self.key).await.map_err(Error::backend);
    }
    let raw = serde_json::to_string(map)?;
    self.kv.set(&self.key, raw).await.map_err(Error::backend)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;
  use crate::{capsule::CapsuleKind, kv::MemoryStore};

  fn entry(id: &str, is_opened: bool) -> TrashEntry {
    let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
    let capsule = Capsule {
      id: id.into(),
      title: "t".into(),
      created_at,
      open_date: created_at + Duration::days(2),
      kind: CapsuleKind::Image,
      content: "https://example.com/x.png".into(),
      is_opened,
    };
    TrashEntry {
      origin: Origin::of(&capsule),
      capsule,
      deleted_at: created_at + Duration::days(3),
    }
  }

  #[tokio::test]
  async fn stash_get_clear() {
    let trash = Trash::new(Arc::new(MemoryStore::new()), "trash");
    trash.stash(entry("a", false)).await.unwrap();
    trash.stash(entry("b", true)).await.unwrap();

    let b = trash.get(&"b".into()).await.unwrap();
    assert_eq!(b, entry("b", true));
    assert_eq!(b.origin, Origin::Opened);

    trash.clear(&"b".into()).await.unwrap();
    trash.clear(&"b".into()).await.unwrap();
    assert_eq!(trash.entries().await.len(), 1);
  }

  #[tokio::test]
  async fn last_clear_drops_the_key() {
    let kv = Arc::new(MemoryStore::new());
    let trash = Trash::new(Arc::clone(&kv), "trash");
    trash.stash(entry("a", false)).await.unwrap();
    trash.clear(&"a".into()).await.unwrap();
    assert_eq!(kv.get("trash").await.unwrap(), None);
  }

  #[tokio::test]
  async fn entries_are_keyed_by_id_on_disk() {
    let kv = Arc::new(MemoryStore::new());
    let trash = Trash::new(Arc::clone(&kv), "trash");
    trash.stash(entry("a", false)).await.unwrap();

    let raw = kv.get("trash").await.unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["a"]["origin"], "pending");
    assert!(json["a"]["capsule"]["openDate"].is_string());
  }

  #[tokio::test]
  async fn malformed_trash_reads_as_empty() {
    let kv = Arc::new(MemoryStore::new());
    kv.set("trash", "[1,2,3]".into()).await.unwrap();
    let trash = Trash::new(kv, "trash");
    assert!(trash.entries().await.is_empty());
    trash.stash(entry("a", false)).await.unwrap();
    assert_eq!(trash.entries().await.len(), 1);
  }
}
