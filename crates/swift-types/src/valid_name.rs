//! Object name sanitising.

/// Cleans up a user-supplied file name so it is safe to store.
///
/// Leading and trailing whitespace is removed, inner spaces become `_`, and
/// anything outside `[-_.\/]` or a unicode word character is dropped.
#[must_use]
pub fn valid_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());

  for c in name.trim().chars() {
    match c {
      ' ' => out.push('_'),
      '-' | '_' | '.' | '/' => out.push(c),
      c if c.is_alphanumeric() => out.push(c),
      _ => {}
    }
  }

  out
}
