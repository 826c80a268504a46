//! Public URL composition.

use percent_encoding::percent_decode_str;
use swift_core::{AuthSession, ObjectName};
use url::Url;

use crate::encode::{encode_object_name, encode_segment};

/// Where the authority and path prefix of a [`BaseUrlSpec`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseUrlSource {
  /// Taken verbatim from the session's storage URL.
  Derived,
  /// Scheme, host and port from a configured override; the override's path
  /// is prepended to the storage URL's path.
  Overridden,
  /// A configured URL that already points at the container root. No session
  /// is needed and the container is not appended.
  Fixed,
}

/// Errors raised while composing a URL.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ComposeError {
  /// The base URL cannot carry a host (e.g. `mailto:`) or has none.
  #[error("base URL `{0}` has no host")]
  NoHost(String),

  /// The composed string did not parse back into a URL.
  #[error("composed URL is not valid: {0}")]
  Invalid(#[from] url::ParseError),

  /// A `.` or `..` component would be collapsed by URL parsing and address
  /// something other than the named object.
  #[error("`{0}` contains a `.` or `..` path component")]
  DotSegment(String),
}

/// The effective public URL template shared by every object of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrlSpec {
  scheme:         String,
  host:           String,
  port:           Option<u16>,
  /// Percent-encoded path segments placed before the container.
  path_prefix:    Vec<String>,
  /// Percent-encoded segments of the storage URL path, as the backend sees
  /// them. Empty for [`BaseUrlSource::Fixed`].
  backend_prefix: Vec<String>,
  source:         BaseUrlSource,
}

/// A composed object URL plus the path a temporary URL signature covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
  /// The public URL.
  pub url:          Url,
  /// Decoded backend path, e.g. `/v1/AUTH_x/container/object`.
  pub signing_path: String,
}

fn segments(url: &Url) -> Vec<String> {
  url
    .path_segments()
    .map(|s| s.filter(|s| !s.is_empty()).map(ToOwned::to_owned).collect())
    .unwrap_or_default()
}

fn authority(url: &Url) -> Result<(String, String, Option<u16>), ComposeError> {
  let host = url
    .host_str()
    .ok_or_else(|| ComposeError::NoHost(url.to_string()))?;
  Ok((url.scheme().to_owned(), host.to_owned(), url.port()))
}

fn join_segments(segments: &[String]) -> String {
  segments.iter().map(|s| format!("/{s}")).collect()
}

fn decode(path: &str) -> String {
  percent_decode_str(path).decode_utf8_lossy().into_owned()
}

impl BaseUrlSpec {
  /// Uses the storage URL as-is.
  pub fn derived(storage_url: &Url) -> Result<Self, ComposeError> {
    let (scheme, host, port) = authority(storage_url)?;
    let backend_prefix = segments(storage_url);
    Ok(Self {
      scheme,
      host,
      port,
      path_prefix: backend_prefix.clone(),
      backend_prefix,
      source: BaseUrlSource::Derived,
    })
  }

  /// Takes scheme, host and port from `override_url` and prepends its path
  /// to the storage URL's path.
  pub fn overridden(
    storage_url: &Url,
    override_url: &Url,
  ) -> Result<Self, ComposeError> {
    let (scheme, host, port) = authority(override_url)?;
    let backend_prefix = segments(storage_url);
    let path_prefix = segments(override_url)
      .into_iter()
      .chain(backend_prefix.iter().cloned())
      .collect();
    Ok(Self {
      scheme,
      host,
      port,
      path_prefix,
      backend_prefix,
      source: BaseUrlSource::Overridden,
    })
  }

  /// [`BaseUrlSpec::overridden`] if an override is given, otherwise
  /// [`BaseUrlSpec::derived`].
  pub fn resolve(
    storage_url: &Url,
    override_url: Option<&Url>,
  ) -> Result<Self, ComposeError> {
    match override_url {
      Some(override_url) => Self::overridden(storage_url, override_url),
      None => Self::derived(storage_url),
    }
  }

  /// Uses `container_root` verbatim as the URL of the container.
  pub fn fixed(container_root: &Url) -> Result<Self, ComposeError> {
    let (scheme, host, port) = authority(container_root)?;
    Ok(Self {
      scheme,
      host,
      port,
      path_prefix: segments(container_root),
      backend_prefix: Vec::new(),
      source: BaseUrlSource::Fixed,
    })
  }

  /// URL scheme.
  #[must_use]
  pub fn scheme(&self) -> &str { &self.scheme }
  /// Host, bracketed if it is an IPv6 literal.
  #[must_use]
  pub fn host(&self) -> &str { &self.host }
  /// Explicit port, `None` when the scheme default applies.
  #[must_use]
  pub const fn port(&self) -> Option<u16> { self.port }
  /// Percent-encoded path segments before the container.
  #[must_use]
  pub fn path_prefix(&self) -> &[String] { &self.path_prefix }
  /// Where this base URL came from.
  #[must_use]
  pub const fn source(&self) -> BaseUrlSource { self.source }

  /// Composes the URL of `object` inside `container`. An empty object name
  /// yields the container root with a trailing slash.
  pub fn locate(
    &self,
    container: &str,
    object: &ObjectName,
  ) -> Result<ObjectLocation, ComposeError> {
    if object.has_dot_segment() {
      return Err(ComposeError::DotSegment(object.to_string()));
    }
    if matches!(container, "." | "..") {
      return Err(ComposeError::DotSegment(container.to_owned()));
    }

    let object_path = encode_object_name(object.as_str());
    let tail = match self.source {
      BaseUrlSource::Fixed => object_path,
      BaseUrlSource::Derived | BaseUrlSource::Overridden => {
        format!("{}/{object_path}", encode_segment(container))
      }
    };

    let origin = match self.port {
      Some(port) => format!("{}://{}:{port}", self.scheme, self.host),
      None => format!("{}://{}", self.scheme, self.host),
    };
    let url = Url::parse(&format!(
      "{origin}{}/{tail}",
      join_segments(&self.path_prefix)
    ))?;

    let signing_path = match self.source {
      BaseUrlSource::Fixed => decode(url.path()),
      BaseUrlSource::Derived | BaseUrlSource::Overridden => {
        decode(&format!("{}/{tail}", join_segments(&self.backend_prefix)))
      }
    };

    Ok(ObjectLocation { url, signing_path })
  }
}

/// Composes the public URL of `name_prefix + object` in `container` for the
/// given session, honouring an optional base URL override.
pub fn compose_url(
  session: &AuthSession,
  override_url: Option<&Url>,
  container: &str,
  object: &ObjectName,
  name_prefix: &str,
) -> Result<Url, ComposeError> {
  let spec = BaseUrlSpec::resolve(session.storage_url(), override_url)?;
  let location = spec.locate(container, &object.with_prefix(name_prefix))?;
  Ok(location.url)
}
