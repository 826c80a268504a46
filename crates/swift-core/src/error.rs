use std::io;

use miette::Diagnostic;

/// Error types for calls against a Swift cluster or its auth endpoint.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum ClientError {
  /// The token or credentials were rejected (HTTP 401).
  #[error("Unauthorized: {0}")]
  Unauthorized(miette::Report),

  /// The addressed container or object does not exist (HTTP 404).
  #[error("Not found: {0}")]
  NotFound(String),

  /// The credentials are valid but lack permission (HTTP 403).
  #[error("Forbidden: {0}")]
  Forbidden(miette::Report),

  /// The request did not complete within the configured timeout.
  #[error("Request timed out: {0}")]
  Timeout(miette::Report),

  /// The remote host could not be reached.
  #[error("Connection error: {0}")]
  Connection(miette::Report),

  /// The server answered with a 5xx status.
  #[error("Server error ({status}): {report}")]
  Server {
    /// HTTP status code.
    status: u16,
    /// Response details.
    report: miette::Report,
  },

  /// The server answered with a status the call does not expect.
  #[error("Unexpected status ({status}): {report}")]
  UnexpectedStatus {
    /// HTTP status code.
    status: u16,
    /// Response details.
    report: miette::Report,
  },

  /// A response could not be understood (bad JSON, missing headers, no
  /// object-store endpoint in the catalog, ...).
  #[error("Protocol error: {0}")]
  Protocol(miette::Report),

  /// The request could not be built from the supplied parameters.
  #[error("Invalid configuration: {0}")]
  InvalidConfig(miette::Report),

  /// A request or response body stream failed.
  #[error("Stream error: {0}")]
  Stream(miette::Report),
}

impl ClientError {
  /// Whether this error means the session token is no longer accepted.
  #[must_use]
  pub const fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Unauthorized(_))
  }

  /// Converts into an [`io::Error`], for adapting response streams into
  /// readers.
  #[must_use]
  pub fn into_io_error(self) -> io::Error {
    let kind = match &self {
      Self::NotFound(_) => io::ErrorKind::NotFound,
      Self::Unauthorized(_) | Self::Forbidden(_) => {
        io::ErrorKind::PermissionDenied
      }
      Self::Timeout(_) => io::ErrorKind::TimedOut,
      Self::Connection(_) => io::ErrorKind::ConnectionRefused,
      _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, self.to_string())
  }
}

/// A type alias for [`Result`] with [`ClientError`].
pub type ClientResult<T> = std::result::Result<T, ClientError>;
