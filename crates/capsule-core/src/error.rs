//! Error types for `capsule-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::capsule::CapsuleId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("capsule not found: {0}")]
  NotFound(CapsuleId),

  /// The grace window already resolved; the record is gone for good.
  #[error("capsule {0} can no longer be restored")]
  RestoreExpired(CapsuleId),

  #[error("capsule {0} is sealed until {1}")]
  StillSealed(CapsuleId, DateTime<Utc>),

  #[error("capsule {0} has already been opened")]
  AlreadyOpened(CapsuleId),

  #[error("capsule id already exists: {0}")]
  DuplicateId(CapsuleId),

  #[error("invalid capsule: {0}")]
  Validation(&'static str),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),
}

impl Error {
  pub(crate) fn backend<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Backend(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
