use miette::{Diagnostic, Report};
use swift_core::{ClientError, ObjectName};
use swift_url::{ComposeError, SigningUnavailable};

use crate::config::ConfigError;

/// Errors from the network layer that are neither auth nor lookup failures.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TransportError {
  /// The request did not complete in time.
  #[error("Request timed out: {0}")]
  Timeout(Report),

  /// The cluster could not be reached.
  #[error("Connection failed: {0}")]
  Connection(Report),

  /// The cluster answered with an error status.
  #[error("Server error ({status}): {report}")]
  Server {
    /// HTTP status code.
    status: u16,
    /// Response details.
    report: Report,
  },

  /// The cluster answered with something that could not be understood.
  #[error("Protocol error: {0}")]
  Protocol(Report),
}

/// Errors from checking or creating the backing container.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum ProvisionError {
  /// The container is missing and auto-creation is disabled.
  #[error("container `{container}` does not exist")]
  NotFound {
    /// The container name.
    container: String,
  },

  /// The existence check failed for a reason other than absence.
  #[error("could not check container `{container}`")]
  Check {
    /// The container name.
    container: String,
    /// The underlying failure.
    #[source]
    source:    ClientError,
  },

  /// The cluster refused to create the container.
  #[error("could not create container `{container}`")]
  CreateFailed {
    /// The container name.
    container: String,
    /// The underlying failure.
    #[source]
    source:    ClientError,
  },
}

impl ProvisionError {
  /// Whether the session token was rejected along the way.
  #[must_use]
  pub const fn is_unauthorized(&self) -> bool {
    match self {
      Self::NotFound { .. } => false,
      Self::Check { source, .. } | Self::CreateFailed { source, .. } => {
        source.is_unauthorized()
      }
    }
  }
}

/// Error types for adapter operations.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum StorageError {
  /// The configuration is incomplete or inconsistent.
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// Credentials were rejected, or a fresh token was rejected again.
  #[error("Authentication failed: {0}")]
  Auth(Report),

  /// The container could not be made available.
  #[error(transparent)]
  Provision(#[from] ProvisionError),

  /// The object does not exist.
  #[error("Object not found: {0}")]
  NotFound(ObjectName),

  /// The token is valid but lacks access.
  #[error("Permission denied: {0}")]
  PermissionDenied(Report),

  /// The request failed in transit.
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// No safe name could be derived.
  #[error("Suspicious name: {0}")]
  SuspiciousName(String),

  /// A body stream failed.
  #[error("Stream error: {0}")]
  Stream(Report),
}

impl StorageError {
  /// Maps a client failure on `name` (as the caller spelled it).
  pub(crate) fn from_client(err: ClientError, name: &ObjectName) -> Self {
    match err {
      ClientError::Unauthorized(report) => Self::Auth(report),
      ClientError::NotFound(_) => Self::NotFound(name.clone()),
      ClientError::Forbidden(report) => Self::PermissionDenied(report),
      ClientError::Timeout(report) => {
        Self::Transport(TransportError::Timeout(report))
      }
      ClientError::Connection(report) => {
        Self::Transport(TransportError::Connection(report))
      }
      ClientError::Server { status, report }
      | ClientError::UnexpectedStatus { status, report } => {
        Self::Transport(TransportError::Server { status, report })
      }
      ClientError::Protocol(report) => {
        Self::Transport(TransportError::Protocol(report))
      }
      ClientError::InvalidConfig(report) => {
        Self::Config(ConfigError::Client(report))
      }
      ClientError::Stream(report) => Self::Stream(report),
    }
  }
}

/// Errors from [`SwiftStorage::url`](crate::SwiftStorage::url), kept apart
/// from [`StorageError`] so that link failures can be told from I/O ones.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum UrlError {
  /// Temporary URLs are enabled but there is no key to sign with.
  #[error(transparent)]
  SigningUnavailable(#[from] SigningUnavailable),

  /// The name was refused, or the session and container needed to derive
  /// the base URL could not be obtained.
  #[error("could not resolve the URL: {0}")]
  Resolve(#[from] StorageError),

  /// The URL could not be composed.
  #[error(transparent)]
  Compose(#[from] ComposeError),
}

/// A type alias for [`Result`] with [`StorageError`].
pub type StorageResult<T> = std::result::Result<T, StorageError>;
