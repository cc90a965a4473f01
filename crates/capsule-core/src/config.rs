//! Runtime configuration for the lifecycle controller.

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::Result;

/// Grace period used when none is configured.
pub const GRACE_PERIOD_MS: u64 = 5_000;

pub const DEFAULT_COLLECTION_KEY: &str = "timeCapsules";
pub const DEFAULT_TRASH_KEY: &str = "timeCapsules.deleted";

/// Controller settings, deserialised from an optional config file and
/// `CAPSULE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// How long a soft-deleted capsule stays recoverable.
  pub grace_period_ms: u64,
  /// Key holding the serialized capsule collection.
  pub collection_key:  String,
  /// Key holding in-flight soft-deleted records.
  pub trash_key:       String,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      grace_period_ms: GRACE_PERIOD_MS,
      collection_key:  DEFAULT_COLLECTION_KEY.to_owned(),
      trash_key:       DEFAULT_TRASH_KEY.to_owned(),
    }
  }
}

impl LifecycleConfig {
  /// Layer `path` (if given and present) and the environment over the
  /// defaults. Environment variables win over the file.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    Self::load_from(path, environment())
  }

  pub(crate) fn load_from(path: Option<&Path>, env: config::Environment) -> Result<Self> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
      builder = builder.add_source(config::File::from(path).required(false));
    }
    let settings = builder
      .add_source(env)
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn grace_period(&self) -> Duration {
    Duration::from_millis(self.grace_period_ms)
  }

  pub fn with_grace_period(mut self, grace: Duration) -> Self {
    self.grace_period_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
    self
  }
}

fn environment() -> config::Environment {
  config::Environment::with_prefix("CAPSULE").try_parsing(true)
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  /// A `CAPSULE_*` environment read from `vars` instead of the process.
  fn env(vars: &[(&str, &str)]) -> config::Environment {
    let map: config::Map<String, String> =
      vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    environment().source(Some(map))
  }

  fn temp_toml(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir()
      .join(format!("capsule-config-{}.toml", uuid::Uuid::new_v4()));
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "{contents}").unwrap();
    path
  }

  #[test]
  fn defaults_without_sources() {
    let cfg = LifecycleConfig::load_from(None, env(&[])).unwrap();
    assert_eq!(cfg.grace_period(), Duration::from_millis(GRACE_PERIOD_MS));
    assert_eq!(cfg.collection_key, DEFAULT_COLLECTION_KEY);
    assert_eq!(cfg.trash_key, DEFAULT_TRASH_KEY);
  }

  #[test]
  fn file_overrides_defaults() {
    let path = temp_toml("grace_period_ms = 250\ncollection_key = \"caps\"");
    let cfg = LifecycleConfig::load_from(Some(&path), env(&[])).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.grace_period_ms, 250);
    assert_eq!(cfg.collection_key, "caps");
    assert_eq!(cfg.trash_key, DEFAULT_TRASH_KEY);
  }

  #[test]
  fn missing_file_is_not_an_error() {
    let path = std::env::temp_dir().join("capsule-config-does-not-exist.toml");
    let cfg = LifecycleConfig::load_from(Some(&path), env(&[])).unwrap();
    assert_eq!(cfg, LifecycleConfig::default());
  }

  #[test]
  fn environment_overrides_defaults() {
    let cfg =
      LifecycleConfig::load_from(None, env(&[("CAPSULE_GRACE_PERIOD_MS", "250")])).unwrap();
    assert_eq!(cfg.grace_period(), Duration::from_millis(250));
    assert_eq!(cfg.collection_key, DEFAULT_COLLECTION_KEY);
  }

  #[test]
  fn environment_overrides_file() {
    let path = temp_toml("grace_period_ms = 9000\ntrash_key = \"bin\"");
    let cfg = LifecycleConfig::load_from(
      Some(&path),
      env(&[("CAPSULE_GRACE_PERIOD_MS", "250")]),
    )
    .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.grace_period_ms, 250);
    assert_eq!(cfg.trash_key, "bin");
  }
}
