//! Temporary URL signing, as verified by Swift's `tempurl` middleware.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use url::Url;

use crate::compose::ObjectLocation;

/// HMAC digest used for signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempUrlDigest {
  /// HMAC-SHA1, accepted by every Swift release.
  #[default]
  Sha1,
  /// HMAC-SHA256.
  Sha256,
}

impl FromStr for TempUrlDigest {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "sha1" => Ok(Self::Sha1),
      "sha256" => Ok(Self::Sha256),
      other => Err(format!("unsupported temp URL digest `{other}`")),
    }
  }
}

/// HTTP method a temporary URL grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TempUrlMethod {
  /// `GET`
  #[default]
  Get,
  /// `HEAD`
  Head,
  /// `PUT`
  Put,
  /// `POST`
  Post,
  /// `DELETE`
  Delete,
}

impl TempUrlMethod {
  /// The method as it appears in the signed message.
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Put => "PUT",
      Self::Post => "POST",
      Self::Delete => "DELETE",
    }
  }
}

/// Raised when a key contains non-ASCII characters or is empty.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("temp URL key must be non-empty ASCII")]
pub struct InvalidTempUrlKey;

/// Raised when a temporary URL is requested without a usable key.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("temporary URLs are enabled but no signing key is configured")]
pub struct SigningUnavailable;

/// The account or container `Temp-URL-Key` secret.
#[derive(Clone, PartialEq, Eq)]
pub struct TempUrlKey(Vec<u8>);

impl TempUrlKey {
  /// Validates and wraps a key.
  pub fn new(key: &str) -> Result<Self, InvalidTempUrlKey> {
    if key.is_empty() || !key.is_ascii() {
      return Err(InvalidTempUrlKey);
    }
    Ok(Self(key.as_bytes().to_vec()))
  }

  /// The raw key bytes.
  #[must_use]
  pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl fmt::Debug for TempUrlKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("TempUrlKey(<redacted>)")
  }
}

fn hmac_hex(digest: TempUrlDigest, key: &[u8], message: &[u8]) -> String {
  match digest {
    TempUrlDigest::Sha1 => {
      let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .expect("HMAC can take key of any size");
      mac.update(message);
      hex::encode(mac.finalize().into_bytes())
    }
    TempUrlDigest::Sha256 => {
      let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .expect("HMAC can take key of any size");
      mac.update(message);
      hex::encode(mac.finalize().into_bytes())
    }
  }
}

/// Computes the hex signature over `"{method}\n{expires_at}\n{path}"`.
///
/// `path` is the decoded backend path, e.g. `/v1/AUTH_x/container/object`.
#[must_use]
pub fn sign(
  method: TempUrlMethod,
  path: &str,
  expires_at: i64,
  key: &TempUrlKey,
  digest: TempUrlDigest,
) -> String {
  let message = format!("{}\n{expires_at}\n{path}", method.as_str());
  hmac_hex(digest, key.as_bytes(), message.as_bytes())
}

/// Signing parameters for temporary URLs.
#[derive(Debug, Clone)]
pub struct TempUrlConfig {
  /// Signing key; without one no temporary URL can be produced.
  pub key:      Option<TempUrlKey>,
  /// How long each generated URL stays valid.
  pub duration: Duration,
  /// HMAC digest.
  pub digest:   TempUrlDigest,
}

impl TempUrlConfig {
  /// Whether both a key and a positive duration are present.
  #[must_use]
  pub const fn can_sign(&self) -> bool {
    self.key.is_some() && !self.duration.is_zero()
  }

  /// Expiry timestamp for a URL generated at `now`.
  #[must_use]
  pub fn expires_at(&self, now: DateTime<Utc>) -> i64 {
    let duration = i64::try_from(self.duration.as_secs()).unwrap_or(i64::MAX);
    now.timestamp().saturating_add(duration)
  }

  /// Appends `temp_url_sig` and `temp_url_expires` to `location.url`,
  /// expiring `duration` after `now`.
  pub fn signed_url(
    &self,
    location: &ObjectLocation,
    method: TempUrlMethod,
    now: DateTime<Utc>,
  ) -> Result<Url, SigningUnavailable> {
    let key = match &self.key {
      Some(key) if !self.duration.is_zero() => key,
      _ => return Err(SigningUnavailable),
    };

    let expires_at = self.expires_at(now);
    let signature =
      sign(method, &location.signing_path, expires_at, key, self.digest);

    let mut url = location.url.clone();
    url
      .query_pairs_mut()
      .append_pair("temp_url_sig", &signature)
      .append_pair("temp_url_expires", &expires_at.to_string());
    Ok(url)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeDelta;
  use swift_core::ObjectName;

  use super::*;
  use crate::BaseUrlSpec;

  const PATH: &str = "/v1/AUTH_012345abcd/django/a.png";

  fn key(s: &str) -> TempUrlKey { TempUrlKey::new(s).unwrap() }

  fn config(key: Option<TempUrlKey>, secs: u64) -> TempUrlConfig {
    TempUrlConfig {
      key,
      duration: Duration::from_secs(secs),
      digest: TempUrlDigest::Sha1,
    }
  }

  fn location() -> ObjectLocation {
    BaseUrlSpec::derived(
      &Url::parse("http://10.0.2.2:8080/v1/AUTH_012345abcd/").unwrap(),
    )
    .unwrap()
    .locate("django", &ObjectName::new("a.png"))
    .unwrap()
  }

  #[test]
  fn test_hmac_known_vectors() {
    // RFC 2202 test case 2 and RFC 4231 test case 2
    let message = b"what do ya want for nothing?";
    assert_eq!(
      hmac_hex(TempUrlDigest::Sha1, b"Jefe", message),
      "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
    );
    assert_eq!(
      hmac_hex(TempUrlDigest::Sha256, b"Jefe", message),
      "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
    );
  }

  #[test]
  fn test_sign_matches_canonical_message() {
    let expected = hmac_hex(
      TempUrlDigest::Sha1,
      b"Key",
      format!("GET\n1440619048\n{PATH}").as_bytes(),
    );
    let signature = sign(
      TempUrlMethod::Get,
      PATH,
      1_440_619_048,
      &key("Key"),
      TempUrlDigest::Sha1,
    );
    assert_eq!(signature, expected);
    assert_eq!(signature.len(), 40);
  }

  #[test]
  fn test_sign_is_deterministic_and_input_sensitive() {
    let base = || {
      sign(TempUrlMethod::Get, PATH, 1000, &key("Key"), TempUrlDigest::Sha1)
    };
    assert_eq!(base(), base());

    let variants = [
      sign(TempUrlMethod::Put, PATH, 1000, &key("Key"), TempUrlDigest::Sha1),
      sign(
        TempUrlMethod::Get,
        "/v1/AUTH_012345abcd/django/b.png",
        1000,
        &key("Key"),
        TempUrlDigest::Sha1,
      ),
      sign(TempUrlMethod::Get, PATH, 1001, &key("Key"), TempUrlDigest::Sha1),
      sign(TempUrlMethod::Get, PATH, 1000, &key("Kez"), TempUrlDigest::Sha1),
      sign(TempUrlMethod::Get, PATH, 1000, &key("Key"), TempUrlDigest::Sha256),
    ];
    for variant in variants {
      assert_ne!(variant, base());
    }
  }

  #[test]
  fn test_signed_url_query() {
    let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let url = config(Some(key("Key")), 60)
      .signed_url(&location(), TempUrlMethod::Get, now)
      .unwrap();

    assert_eq!(
      url.as_str().split('?').next(),
      Some("http://10.0.2.2:8080/v1/AUTH_012345abcd/django/a.png")
    );
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs[0].0, "temp_url_sig");
    assert_eq!(
      pairs[0].1,
      sign(
        TempUrlMethod::Get,
        PATH,
        1_700_000_060,
        &key("Key"),
        TempUrlDigest::Sha1
      )
    );
    assert_eq!(pairs[1], ("temp_url_expires".into(), "1700000060".into()));
  }

  #[test]
  fn test_expiry_increases_with_time() {
    let config = config(Some(key("Key")), 1800);
    let earlier = Utc::now();
    let later = earlier + TimeDelta::seconds(5);
    assert!(config.expires_at(later) > config.expires_at(earlier));
    assert_eq!(config.expires_at(earlier), earlier.timestamp() + 1800);
  }

  #[test]
  fn test_signing_unavailable_without_key_or_duration() {
    let now = Utc::now();
    assert!(
      config(None, 60)
        .signed_url(&location(), TempUrlMethod::Get, now)
        .is_err()
    );
    assert!(
      config(Some(key("Key")), 0)
        .signed_url(&location(), TempUrlMethod::Get, now)
        .is_err()
    );
    assert!(!config(None, 60).can_sign());
  }

  #[test]
  fn test_key_must_be_ascii() {
    assert!(TempUrlKey::new("aあä").is_err());
    assert!(TempUrlKey::new("").is_err());
    assert!(TempUrlKey::new("Key").is_ok());
  }
}
