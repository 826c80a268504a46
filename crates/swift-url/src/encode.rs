use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything but RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'.')
  .remove(b'_')
  .remove(b'~');

/// Percent-encodes a single path segment, `/` included.
#[must_use]
pub fn encode_segment(segment: &str) -> String {
  utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Percent-encodes an object name, keeping `/` as the pseudo-directory
/// separator.
#[must_use]
pub fn encode_object_name(name: &str) -> String {
  name.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_segment_reserved() {
    assert_eq!(encode_segment("a.png"), "a.png");
    assert_eq!(
      encode_segment("file with spaces.txt"),
      "file%20with%20spaces.txt"
    );
    assert_eq!(encode_segment("a/b"), "a%2Fb");
    assert_eq!(encode_segment("q?x=1&y#z"), "q%3Fx%3D1%26y%23z");
    assert_eq!(encode_segment("~tilde_-."), "~tilde_-.");
  }

  #[test]
  fn test_encode_object_name_keeps_separators() {
    assert_eq!(encode_object_name("images/test.png"), "images/test.png");
    assert_eq!(
      encode_object_name("images/test终端.png"),
      "images/test%E7%BB%88%E7%AB%AF.png"
    );
    assert_eq!(encode_object_name("dir/"), "dir/");
    assert_eq!(encode_object_name(""), "");
  }
}
