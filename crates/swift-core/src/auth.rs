//! Authentication requests and the sessions they produce.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, de};
use url::Url;

/// Keystone/TempAuth protocol version used to obtain a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthVersion {
  /// Swift TempAuth / v1.0 header-based auth.
  V1,
  /// Keystone v2.0 tokens API.
  V2,
  /// Keystone v3 tokens API.
  V3,
}

impl AuthVersion {
  /// Best-effort guess of the protocol from which credential fields are
  /// populated: any domain field selects v3, a tenant/project alone selects
  /// v2, bare username and key select v1.
  #[must_use]
  pub const fn detect(has_project: bool, has_domain: bool) -> Self {
    match (has_project, has_domain) {
      (_, true) => Self::V3,
      (true, false) => Self::V2,
      (false, false) => Self::V1,
    }
  }

  /// The version as it is conventionally written in configuration.
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::V1 => "1",
      Self::V2 => "2",
      Self::V3 => "3",
    }
  }
}

impl fmt::Display for AuthVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error returned when an auth version string is not recognised.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("unknown auth version `{0}`, expected 1, 2 or 3")]
pub struct UnknownAuthVersion(pub String);

impl FromStr for AuthVersion {
  type Err = UnknownAuthVersion;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().trim_start_matches(['v', 'V']) {
      "1" | "1.0" => Ok(Self::V1),
      "2" | "2.0" => Ok(Self::V2),
      "3" | "3.0" => Ok(Self::V3),
      other => Err(UnknownAuthVersion(other.to_owned())),
    }
  }
}

impl<'de> Deserialize<'de> for AuthVersion {
  fn deserialize<D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Self, D::Error> {
    // accepts both `3` and `"3"`
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
      Int(u64),
      Str(String),
    }

    let raw = match Repr::deserialize(deserializer)? {
      Repr::Int(i) => i.to_string(),
      Repr::Str(s) => s,
    };
    raw.parse().map_err(de::Error::custom)
  }
}

/// A Keystone entity referenced either by name or by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOrId {
  /// Reference by name.
  Name(String),
  /// Reference by id.
  Id(String),
}

/// Which catalog interface to pick the storage URL from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointType {
  /// `publicURL` / `public`.
  #[default]
  Public,
  /// `internalURL` / `internal`.
  Internal,
  /// `adminURL` / `admin`.
  Admin,
}

impl EndpointType {
  /// The v3 catalog `interface` value.
  #[must_use]
  pub const fn interface(self) -> &'static str {
    match self {
      Self::Public => "public",
      Self::Internal => "internal",
      Self::Admin => "admin",
    }
  }

  /// The v2 catalog endpoint field name.
  #[must_use]
  pub const fn v2_field(self) -> &'static str {
    match self {
      Self::Public => "publicURL",
      Self::Internal => "internalURL",
      Self::Admin => "adminURL",
    }
  }
}

impl FromStr for EndpointType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "public" | "publicURL" => Ok(Self::Public),
      "internal" | "internalURL" => Ok(Self::Internal),
      "admin" | "adminURL" => Ok(Self::Admin),
      other => Err(format!("unknown endpoint type `{other}`")),
    }
  }
}

/// Everything needed to exchange credentials for an [`AuthSession`].
#[derive(Clone)]
pub struct AuthRequest {
  /// The auth endpoint.
  pub auth_url:       Url,
  /// Protocol to speak with the auth endpoint.
  pub version:        AuthVersion,
  /// User name.
  pub username:       String,
  /// Key or password.
  pub key:            String,
  /// Tenant (v2) or project (v3) scope.
  pub project:        Option<NameOrId>,
  /// Domain of the user (v3).
  pub user_domain:    Option<NameOrId>,
  /// Domain of the project (v3).
  pub project_domain: Option<NameOrId>,
  /// Preferred catalog region.
  pub region:         Option<String>,
  /// Catalog interface to use.
  pub endpoint_type:  EndpointType,
  /// Catalog service type of the object store.
  pub service_type:   String,
}

impl fmt::Debug for AuthRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AuthRequest")
      .field("auth_url", &self.auth_url.as_str())
      .field("version", &self.version)
      .field("username", &self.username)
      .field("key", &format_args!("<redacted>"))
      .field("project", &self.project)
      .field("user_domain", &self.user_domain)
      .field("project_domain", &self.project_domain)
      .field("region", &self.region)
      .field("endpoint_type", &self.endpoint_type)
      .field("service_type", &self.service_type)
      .finish()
  }
}

/// One authenticated connection to the storage backend.
///
/// The token and storage URL only ever travel together; a refresh produces a
/// whole new session.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
  token:       String,
  storage_url: Url,
  expires_at:  Option<DateTime<Utc>>,
  region:      Option<String>,
}

impl AuthSession {
  /// Creates a session with no known expiry.
  #[must_use]
  pub const fn new(token: String, storage_url: Url) -> Self {
    Self {
      token,
      storage_url,
      expires_at: None,
      region: None,
    }
  }

  /// Sets the expiry reported by the auth server.
  #[must_use]
  pub const fn with_expiry(
    mut self,
    expires_at: Option<DateTime<Utc>>,
  ) -> Self {
    self.expires_at = expires_at;
    self
  }

  /// Sets the catalog region the storage URL came from.
  #[must_use]
  pub fn with_region(mut self, region: Option<String>) -> Self {
    self.region = region;
    self
  }

  /// The auth token to send as `X-Auth-Token`.
  #[must_use]
  pub fn token(&self) -> &str { &self.token }
  /// The account URL, e.g. `https://swift/v1/AUTH_abc`.
  #[must_use]
  pub const fn storage_url(&self) -> &Url { &self.storage_url }
  /// When the token stops being valid, if known.
  #[must_use]
  pub const fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }
  /// Catalog region, if any.
  #[must_use]
  pub fn region(&self) -> Option<&str> { self.region.as_deref() }

  /// Whether the session may still be used at `now`. Sessions without a
  /// known expiry are always considered usable until the server rejects
  /// them.
  #[must_use]
  pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_none_or(|expires_at| expires_at > now)
  }
}

/// `now + ttl`, or `None` when that instant cannot be represented.
#[must_use]
pub fn expiry_after(
  now: DateTime<Utc>,
  ttl: Duration,
) -> Option<DateTime<Utc>> {
  TimeDelta::from_std(ttl)
    .ok()
    .and_then(|ttl| now.checked_add_signed(ttl))
}

impl fmt::Debug for AuthSession {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AuthSession")
      .field("token", &format_args!("<redacted>"))
      .field("storage_url", &self.storage_url.as_str())
      .field("expires_at", &self.expires_at)
      .field("region", &self.region)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_detect_version() {
    assert_eq!(AuthVersion::detect(false, false), AuthVersion::V1);
    assert_eq!(AuthVersion::detect(true, false), AuthVersion::V2);
    assert_eq!(AuthVersion::detect(true, true), AuthVersion::V3);
    assert_eq!(AuthVersion::detect(false, true), AuthVersion::V3);
  }

  #[test]
  fn test_parse_version() {
    assert_eq!("3".parse::<AuthVersion>().unwrap(), AuthVersion::V3);
    assert_eq!("v2.0".parse::<AuthVersion>().unwrap(), AuthVersion::V2);
    assert_eq!("1.0".parse::<AuthVersion>().unwrap(), AuthVersion::V1);
    assert!("4".parse::<AuthVersion>().is_err());
  }

  #[test]
  fn test_session_usable() {
    let url = Url::parse("http://10.0.2.2:8080/v1/AUTH_012345abcd").unwrap();
    let now = Utc::now();

    let session = AuthSession::new("tok".into(), url);
    assert!(session.is_usable_at(now));

    let expired =
      session.clone().with_expiry(Some(now - TimeDelta::seconds(1)));
    assert!(!expired.is_usable_at(now));

    let fresh = session.with_expiry(Some(now + TimeDelta::seconds(60)));
    assert!(fresh.is_usable_at(now));
  }

  #[test]
  fn test_expiry_after_overflow() {
    let now = Utc::now();
    assert_eq!(
      expiry_after(now, Duration::from_secs(60)),
      Some(now + TimeDelta::seconds(60))
    );
    let huge = Duration::from_secs(10_000_000_000_000);
    assert_eq!(expiry_after(now, huge), None);
    assert_eq!(expiry_after(now, Duration::MAX), None);
  }

  #[test]
  fn test_debug_redacts_secrets() {
    let url = Url::parse("http://10.0.2.2:8080/v1/AUTH_x").unwrap();
    let session = AuthSession::new("super-secret".into(), url);
    assert!(!format!("{session:?}").contains("super-secret"));
  }
}
