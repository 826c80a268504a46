use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of an object inside a Swift container.
///
/// Names use `/` as the pseudo-directory separator. Backslashes are
/// normalised to `/` on construction so that names built from Windows paths
/// address the same object.
#[derive(
  Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct ObjectName(String);

impl ObjectName {
  /// Create a new object name.
  pub fn new(name: impl Into<String>) -> Self {
    let name: String = name.into();
    if name.contains('\\') {
      Self(name.replace('\\', "/"))
    } else {
      Self(name)
    }
  }
  /// Get the name as a string slice.
  #[must_use]
  pub fn as_str(&self) -> &str { &self.0 }
  /// Convert into inner String.
  #[must_use]
  pub fn into_inner(self) -> String { self.0 }
  /// Whether the name is empty, i.e. it addresses the container root.
  #[must_use]
  pub const fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Prepends `prefix` verbatim. Prefixes are not separated by `/`.
  #[must_use]
  pub fn with_prefix(&self, prefix: &str) -> Self {
    if prefix.is_empty() {
      return self.clone();
    }
    Self::new(format!("{prefix}{}", self.0))
  }

  /// Removes `prefix` from the front of the name, if present.
  #[must_use]
  pub fn strip_prefix(&self, prefix: &str) -> Option<Self> {
    self.0.strip_prefix(prefix).map(|s| Self(s.to_owned()))
  }

  /// The final path component.
  #[must_use]
  pub fn basename(&self) -> &str {
    self.0.rsplit('/').next().unwrap_or(&self.0)
  }

  /// Whether any component is `.` or `..`. URL parsers collapse such
  /// components, so these names cannot be addressed inside a container.
  #[must_use]
  pub fn has_dot_segment(&self) -> bool {
    self.0.split('/').any(|part| part == "." || part == "..")
  }
}

impl fmt::Display for ObjectName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for ObjectName {
  fn from(s: String) -> Self { Self::new(s) }
}

impl From<&str> for ObjectName {
  fn from(s: &str) -> Self { Self::new(s) }
}

impl AsRef<str> for ObjectName {
  fn as_ref(&self) -> &str { &self.0 }
}
