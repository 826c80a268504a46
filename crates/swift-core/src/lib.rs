//! Trait for a Swift object-storage client.

pub mod auth;
mod error;

use std::{io, pin::Pin};

use async_trait::async_trait;
pub use bytes::Bytes;
use chrono::{DateTime, Utc};
pub use futures::stream::Stream;
pub use swift_types::ObjectName;

pub use self::{
  auth::{AuthRequest, AuthSession, AuthVersion, expiry_after},
  error::{ClientError, ClientResult},
};

/// Type alias for streaming request data
pub type RequestStream =
  Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;
/// Type alias for streaming response data
pub type ResponseStream =
  Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Metadata associated with a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
  /// Size of the object in bytes
  pub size:          u64,
  /// `ETag`, which Swift sets to the MD5 of the content
  pub etag:          Option<String>,
  /// Content type
  pub content_type:  Option<String>,
  /// Last modified timestamp
  pub last_modified: Option<DateTime<Utc>>,
}

/// Metadata associated with a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
  /// Number of objects in the container
  pub object_count: u64,
  /// Total bytes stored in the container
  pub bytes_used:   u64,
  /// The container read ACL, if any
  pub read_acl:     Option<String>,
}

/// Metadata to apply when creating a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
  /// Value for `X-Container-Read`, e.g. `.r:*` for public read
  pub read_acl:     Option<String>,
  /// Value for `X-Container-Meta-Access-Control-Allow-Origin`
  pub allow_origin: Option<String>,
}

/// Options for uploading objects
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
  /// Content type to store with the object
  pub content_type:   Option<String>,
  /// Content length, if known up front; otherwise the upload is chunked
  pub content_length: Option<u64>,
}

/// Parameters of a container listing
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
  /// Only list names starting with this prefix
  pub prefix:       Option<String>,
  /// Roll up names containing this delimiter after the prefix into
  /// pseudo-directories
  pub delimiter:    Option<char>,
  /// Follow pagination markers until the listing is exhausted
  pub full_listing: bool,
}

/// A single object in a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
  /// The object's name
  pub name:          ObjectName,
  /// Size in bytes
  pub size:          u64,
  /// MD5 hash if available
  pub etag:          Option<String>,
  /// Content type if available
  pub content_type:  Option<String>,
  /// Last modified timestamp
  pub last_modified: Option<DateTime<Utc>>,
}

/// A single entry in a list operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
  /// A stored object.
  Object(ObjectEntry),
  /// A rolled-up pseudo-directory, including the trailing delimiter.
  Subdir(String),
}

/// Main trait for calls against a Swift cluster.
///
/// Every call except [`SwiftClientLike::authenticate`] is made on behalf of
/// an [`AuthSession`]; implementers report a rejected token as
/// [`ClientError::Unauthorized`] so callers can refresh and retry.
#[async_trait]
pub trait SwiftClientLike: Send + Sync {
  /// Exchange credentials for a token and storage URL
  async fn authenticate(
    &self,
    request: &AuthRequest,
  ) -> ClientResult<AuthSession>;

  /// Fetch container metadata; [`ClientError::NotFound`] if it is missing
  async fn head_container(
    &self,
    session: &AuthSession,
    container: &str,
  ) -> ClientResult<ContainerMetadata>;

  /// Create a container, succeeding if it already exists
  async fn put_container(
    &self,
    session: &AuthSession,
    container: &str,
    options: &ContainerOptions,
  ) -> ClientResult<()>;

  /// Upload data from a stream to an object
  async fn put_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
    data: RequestStream,
    options: UploadOptions,
  ) -> ClientResult<()>;

  /// Download an object as a stream
  async fn get_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<(ObjectMetadata, ResponseStream)>;

  /// Get metadata for an object without downloading content
  async fn head_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<ObjectMetadata>;

  /// Delete an object
  async fn delete_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<()>;

  /// List the contents of a container
  async fn list_objects(
    &self,
    session: &AuthSession,
    container: &str,
    query: &ListQuery,
  ) -> ClientResult<Vec<ListEntry>>;
}
