//! Capsule types — the single record kind held by the store.
//!
//! A capsule is a message or image link sealed until its `open_date`. The
//! serialized form uses camelCase field names and RFC 3339 timestamps so a
//! collection written by a browser (`Date.toISOString`) reads back unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Opaque capsule identifier.
///
/// New capsules get a UUID v4 string; any other non-empty string found in
/// storage (e.g. a millisecond timestamp) is accepted as-is.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CapsuleId(String);

impl CapsuleId {
  pub fn generate() -> Self { Self(Uuid::new_v4().hyphenated().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CapsuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for CapsuleId {
  fn from(s: String) -> Self { Self(s) }
}

impl From<&str> for CapsuleId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Kind ────────────────────────────────────────────────────────────────────

/// What the `content` field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleKind {
  /// Free text.
  Message,
  /// A URL pointing at an image; no image bytes are stored.
  Image,
}

// ─── Capsule ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
  pub id:         CapsuleId,
  pub title:      String,
  pub created_at: DateTime<Utc>,
  pub open_date:  DateTime<Utc>,
  #[serde(rename = "type")]
  pub kind:       CapsuleKind,
  pub content:    String,
  pub is_opened:  bool,
}

/// Where a capsule sits from the user's point of view at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleStatus {
  /// Pending and `open_date` is still in the future.
  Locked,
  /// Pending and `open_date` has passed; `open` will succeed.
  Ready,
  Opened,
}

impl Capsule {
  /// Build a fresh, unopened capsule from validated input.
  pub fn new(input: NewCapsule, now: DateTime<Utc>) -> Result<Self> {
    input.validate(now)?;
    Ok(Self {
      id:         CapsuleId::generate(),
      title:      input.title,
      created_at: now,
      open_date:  input.open_date,
      kind:       input.kind,
      content:    input.content,
      is_opened:  false,
    })
  }

  /// True iff `now` has reached `open_date`. The boundary instant counts.
  pub fn can_open_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.open_date
  }

  pub fn status_at(&self, now: DateTime<Utc>) -> CapsuleStatus {
    if self.is_opened {
      CapsuleStatus::Opened
    } else if self.can_open_at(now) {
      CapsuleStatus::Ready
    } else {
      CapsuleStatus::Locked
    }
  }

  /// Apply an edit in place. Opened capsules are frozen.
  pub fn apply(&mut self, edit: CapsuleEdit) -> Result<()> {
    if self.is_opened {
      return Err(Error::AlreadyOpened(self.id.clone()));
    }
    validate_fields(&edit.title, &edit.content)?;
    if edit.open_date < self.created_at {
      return Err(Error::Validation(
        "open date must not precede the creation time",
      ));
    }
    self.title = edit.title;
    self.open_date = edit.open_date;
    self.kind = edit.kind;
    self.content = edit.content;
    Ok(())
  }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Input to [`crate::lifecycle::Lifecycle::create`]. `id`, `created_at` and
/// `is_opened` are always assigned by the controller.
#[derive(Debug, Clone)]
pub struct NewCapsule {
  pub title:     String,
  pub open_date: DateTime<Utc>,
  pub kind:      CapsuleKind,
  pub content:   String,
}

impl NewCapsule {
  pub fn message(
    title: impl Into<String>,
    open_date: DateTime<Utc>,
    body: impl Into<String>,
  ) -> Self {
    Self {
      title: title.into(),
      open_date,
      kind: CapsuleKind::Message,
      content: body.into(),
    }
  }

  pub fn image(
    title: impl Into<String>,
    open_date: DateTime<Utc>,
    url: impl Into<String>,
  ) -> Self {
    Self {
      title: title.into(),
      open_date,
      kind: CapsuleKind::Image,
      content: url.into(),
    }
  }

  fn validate(&self, now: DateTime<Utc>) -> Result<()> {
    validate_fields(&self.title, &self.content)?;
    if self.open_date < now {
      return Err(Error::Validation("open date must not be in the past"));
    }
    Ok(())
  }
}

/// Replacement values for the editable fields of a pending capsule.
#[derive(Debug, Clone)]
pub struct CapsuleEdit {
  pub title:     String,
  pub open_date: DateTime<Utc>,
  pub kind:      CapsuleKind,
  pub content:   String,
}

impl From<&Capsule> for CapsuleEdit {
  fn from(c: &Capsule) -> Self {
    Self {
      title:     c.title.clone(),
      open_date: c.open_date,
      kind:      c.kind,
      content:   c.content.clone(),
    }
  }
}

fn validate_fields(title: &str, content: &str) -> Result<()> {
  if title.trim().is_empty() {
    return Err(Error::Validation("title must not be empty"));
  }
  if content.trim().is_empty() {
    return Err(Error::Validation("content must not be empty"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

  fn sample(open_date: DateTime<Utc>) -> Capsule {
    Capsule {
      id: CapsuleId::from("1712345678901"),
      title: "Letter to future me".into(),
      created_at: at(1_700_000_000),
      open_date,
      kind: CapsuleKind::Message,
      content: "Did you learn Rust yet?".into(),
      is_opened: false,
    }
  }

  #[test]
  fn can_open_includes_boundary_instant() {
    let open = at(1_800_000_000);
    let c = sample(open);
    assert!(!c.can_open_at(open - Duration::milliseconds(1)));
    assert!(c.can_open_at(open));
    assert!(c.can_open_at(open + Duration::seconds(1)));
  }

  #[test]
  fn status_tracks_open_flag_and_date() {
    let open = at(1_800_000_000);
    let mut c = sample(open);
    assert_eq!(c.status_at(open - Duration::hours(1)), CapsuleStatus::Locked);
    assert_eq!(c.status_at(open), CapsuleStatus::Ready);
    c.is_opened = true;
    assert_eq!(c.status_at(open - Duration::hours(1)), CapsuleStatus::Opened);
  }

  #[test]
  fn serializes_with_browser_field_names() {
    let c = sample(at(1_800_000_000));
    let json = serde_json::to_value(&c).unwrap();
    assert_eq!(json["type"], "message");
    assert_eq!(json["isOpened"], false);
    assert!(json["createdAt"].is_string());
    assert!(json.get("kind").is_none());
  }

  #[test]
  fn parses_javascript_iso_timestamps() {
    let raw = r#"{
      "id": "1712345678901",
      "title": "Graduation",
      "createdAt": "2024-04-05T19:34:38.901Z",
      "openDate": "2028-06-01T00:00:00.000Z",
      "type": "image",
      "content": "https://example.com/cap.png",
      "isOpened": false
    }"#;
    let c: Capsule = serde_json::from_str(raw).unwrap();
    assert_eq!(c.kind, CapsuleKind::Image);
    assert_eq!(c.open_date, Utc.with_ymd_and_hms(2028, 6, 1, 0, 0, 0).unwrap());
    assert_eq!(c.id.as_str(), "1712345678901");
  }

  #[test]
  fn new_rejects_blank_title_and_past_open_date() {
    let now = at(1_700_000_000);
    let blank = NewCapsule::message("   ", now + Duration::days(1), "hi");
    assert!(matches!(Capsule::new(blank, now), Err(Error::Validation(_))));

    let past = NewCapsule::message("t", now - Duration::seconds(1), "hi");
    assert!(matches!(Capsule::new(past, now), Err(Error::Validation(_))));

    let empty = NewCapsule::image("t", now, "");
    assert!(matches!(Capsule::new(empty, now), Err(Error::Validation(_))));
  }

  #[test]
  fn new_assigns_identity_and_sealed_state() {
    let now = at(1_700_000_000);
    let c = Capsule::new(NewCapsule::message("t", now, "body"), now).unwrap();
    assert!(!c.is_opened);
    assert_eq!(c.created_at, now);
    assert!(Uuid::parse_str(c.id.as_str()).is_ok());
  }

  #[test]
  fn apply_refuses_opened_capsules() {
    let mut c = sample(at(1_800_000_000));
    c.is_opened = true;
    let edit = CapsuleEdit { title: "changed".into(), ..CapsuleEdit::from(&c) };
    assert!(matches!(c.apply(edit), Err(Error::AlreadyOpened(_))));
    assert_eq!(c.title, "Letter to future me");
  }

  #[test]
  fn apply_replaces_editable_fields() {
    let mut c = sample(at(1_800_000_000));
    let edit = CapsuleEdit {
      title:     "Photo".into(),
      open_date: at(1_900_000_000),
      kind:      CapsuleKind::Image,
      content:   "https://example.com/a.jpg".into(),
    };
    c.apply(edit).unwrap();
    assert_eq!(c.kind, CapsuleKind::Image);
    assert_eq!(c.open_date, at(1_900_000_000));
    assert_eq!(c.created_at, at(1_700_000_000));
  }
}
