//! Human-readable time left until a capsule unlocks.

use std::fmt;

use chrono::{DateTime, Utc};

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Time left until `open_date`, truncated to whole days or hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
  Ready,
  Days(i64),
  /// Less than a full day; may be zero hours.
  Hours(i64),
}

impl Remaining {
  pub fn between(open_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
    let diff = (open_date - now).num_milliseconds();
    if diff <= 0 {
      return Self::Ready;
    }
    let days = diff / MS_PER_DAY;
    if days > 0 {
      Self::Days(days)
    } else {
      Self::Hours((diff % MS_PER_DAY) / MS_PER_HOUR)
    }
  }
}

impl fmt::Display for Remaining {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::Ready => f.write_str("Ready to open!"),
      Self::Days(n) => write!(f, "{n} day{} remaining", plural(n)),
      Self::Hours(n) => write!(f, "{n} hour{} remaining", plural(n)),
    }
  }
}

fn plural(n: i64) -> &'static str { if n == 1 { "" } else { "s" } }

/// Display string for the time left until `open_date`.
pub fn remaining_time(open_date: DateTime<Utc>, now: DateTime<Utc>) -> String {
  Remaining::between(open_date, now).to_string()
}
