//! Container listing responses (`?format=json`).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use swift_core::{ListEntry, ObjectEntry, ObjectName};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawEntry {
  Subdir {
    subdir: String,
  },
  Object {
    name:          String,
    bytes:         u64,
    hash:          Option<String>,
    content_type:  Option<String>,
    last_modified: Option<String>,
  },
}

impl RawEntry {
  /// The pagination marker for the next page.
  pub(crate) fn marker(&self) -> &str {
    match self {
      Self::Subdir { subdir } => subdir,
      Self::Object { name, .. } => name,
    }
  }
}

/// Swift reports listing timestamps as naive UTC with microseconds.
fn parse_last_modified(raw: &str) -> Option<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|naive| naive.and_utc())
}

impl From<RawEntry> for ListEntry {
  fn from(raw: RawEntry) -> Self {
    match raw {
      RawEntry::Subdir { subdir } => Self::Subdir(subdir),
      RawEntry::Object {
        name,
        bytes,
        hash,
        content_type,
        last_modified,
      } => Self::Object(ObjectEntry {
        name: ObjectName::new(name),
        size: bytes,
        etag: hash,
        content_type,
        last_modified: last_modified.as_deref().and_then(parse_last_modified),
      }),
    }
  }
}
