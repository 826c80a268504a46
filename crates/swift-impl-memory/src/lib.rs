//! In-memory implementation of the Swift client interface.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
  time::Duration,
};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{TryStreamExt, stream};
use swift_core::{
  AuthRequest, AuthSession, ClientError, ClientResult, ContainerMetadata,
  ContainerOptions, ListEntry, ListQuery, ObjectEntry, ObjectMetadata,
  ObjectName, RequestStream, ResponseStream, SwiftClientLike, UploadOptions,
  expiry_after,
};
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

/// Internal representation of a stored object
#[derive(Debug, Clone)]
struct StoredObject {
  /// The actual object data
  data:          Bytes,
  /// Content type
  content_type:  Option<String>,
  /// ETag (MD5 of the content, as Swift computes it)
  etag:          String,
  /// Last modified timestamp
  last_modified: DateTime<Utc>,
}

impl StoredObject {
  fn new(data: Bytes, content_type: Option<String>) -> Self {
    let etag = format!("{:x}", md5::compute(&data));
    Self {
      data,
      content_type,
      etag,
      last_modified: Utc::now(),
    }
  }

  fn metadata(&self) -> ObjectMetadata {
    ObjectMetadata {
      size:          self.data.len() as u64,
      etag:          Some(self.etag.clone()),
      content_type:  self.content_type.clone(),
      last_modified: Some(self.last_modified),
    }
  }
}

#[derive(Debug, Default)]
struct StoredContainer {
  options: ContainerOptions,
  objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Cluster {
  tokens:        HashSet<String>,
  token_seq:     u64,
  containers:    HashMap<String, StoredContainer>,
  reject_auth:   bool,
  reject_tokens: bool,
}

#[derive(Debug, Default)]
struct Counters {
  authenticate:   AtomicUsize,
  head_container: AtomicUsize,
  put_container:  AtomicUsize,
  object_calls:   AtomicUsize,
}

/// Number of calls a [`SwiftClientMemory`] has served, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
  /// Token requests.
  pub authenticate:   usize,
  /// Container existence checks.
  pub head_container: usize,
  /// Container creations.
  pub put_container:  usize,
  /// Object and listing calls.
  pub object_calls:   usize,
}

/// An optional duration, in milliseconds, visible to every clone.
#[derive(Debug)]
struct SharedDuration(AtomicU64);

impl SharedDuration {
  const UNSET: u64 = u64::MAX;

  const fn unset() -> Self { Self(AtomicU64::new(Self::UNSET)) }

  fn set(&self, duration: Duration) {
    let millis = u64::try_from(duration.as_millis())
      .unwrap_or(u64::MAX)
      .min(Self::UNSET - 1);
    self.0.store(millis, Ordering::SeqCst);
  }

  fn get(&self) -> Option<Duration> {
    match self.0.load(Ordering::SeqCst) {
      Self::UNSET => None,
      millis => Some(Duration::from_millis(millis)),
    }
  }
}

#[derive(Debug)]
struct Inner {
  storage_url: Url,
  username:    String,
  key:         String,
  token_ttl:   SharedDuration,
  auth_delay:  SharedDuration,
  cluster:     RwLock<Cluster>,
  counters:    Counters,
}

/// In-memory implementation of [`SwiftClientLike`].
///
/// Emulates one Swift account: it issues tokens for a single user, keeps
/// containers and objects in memory and counts the calls it serves. Useful
/// for testing; all data is lost when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct SwiftClientMemory {
  inner: Arc<Inner>,
}

impl SwiftClientMemory {
  /// Creates an empty cluster whose auth endpoint hands out `storage_url`
  /// and accepts `username`/`key`.
  #[must_use]
  pub fn new(storage_url: Url, username: &str, key: &str) -> Self {
    Self {
      inner: Arc::new(Inner {
        storage_url,
        username: username.to_owned(),
        key: key.to_owned(),
        token_ttl: SharedDuration::unset(),
        auth_delay: SharedDuration::unset(),
        cluster: RwLock::new(Cluster::default()),
        counters: Counters::default(),
      }),
    }
  }

  /// Reports this expiry, relative to issue time, with every token. The
  /// setting is shared with all clones.
  #[must_use]
  pub fn with_token_ttl(self, ttl: Duration) -> Self {
    self.inner.token_ttl.set(ttl);
    self
  }

  /// Makes every token request take at least `delay`. The setting is
  /// shared with all clones.
  #[must_use]
  pub fn with_auth_delay(self, delay: Duration) -> Self {
    self.inner.auth_delay.set(delay);
    self
  }

  /// Creates a container without counting it as a client call.
  pub async fn create_container(&self, name: &str) {
    self
      .inner
      .cluster
      .write()
      .await
      .containers
      .entry(name.to_owned())
      .or_default();
  }

  /// The options a container was created with, if it exists.
  pub async fn container_options(
    &self,
    name: &str,
  ) -> Option<ContainerOptions> {
    let cluster = self.inner.cluster.read().await;
    cluster.containers.get(name).map(|c| c.options.clone())
  }

  /// Names of all objects in a container, sorted.
  pub async fn object_names(&self, container: &str) -> Vec<String> {
    let cluster = self.inner.cluster.read().await;
    cluster
      .containers
      .get(container)
      .map(|c| c.objects.keys().cloned().collect())
      .unwrap_or_default()
  }

  /// Invalidates every token issued so far.
  pub async fn revoke_tokens(&self) {
    self.inner.cluster.write().await.tokens.clear();
  }

  /// Makes every authenticated call fail with 401, even with fresh tokens.
  pub async fn set_reject_tokens(&self, reject: bool) {
    self.inner.cluster.write().await.reject_tokens = reject;
  }

  /// Makes every token request fail with 401.
  pub async fn set_reject_auth(&self, reject: bool) {
    self.inner.cluster.write().await.reject_auth = reject;
  }

  /// Snapshot of the call counters.
  #[must_use]
  pub fn calls(&self) -> CallCounts {
    let counters = &self.inner.counters;
    CallCounts {
      authenticate:   counters.authenticate.load(Ordering::SeqCst),
      head_container: counters.head_container.load(Ordering::SeqCst),
      put_container:  counters.put_container.load(Ordering::SeqCst),
      object_calls:   counters.object_calls.load(Ordering::SeqCst),
    }
  }

  fn authorize(cluster: &Cluster, session: &AuthSession) -> ClientResult<()> {
    if cluster.reject_tokens || !cluster.tokens.contains(session.token()) {
      return Err(ClientError::Unauthorized(miette::miette!(
        "token is not valid"
      )));
    }
    Ok(())
  }

  fn container<'a>(
    cluster: &'a Cluster,
    name: &str,
  ) -> ClientResult<&'a StoredContainer> {
    cluster
      .containers
      .get(name)
      .ok_or_else(|| ClientError::NotFound(name.to_owned()))
  }

  fn count_object_call(&self) {
    self.inner.counters.object_calls.fetch_add(1, Ordering::SeqCst);
  }
}

fn object_not_found(container: &str, name: &ObjectName) -> ClientError {
  ClientError::NotFound(format!("{container}/{name}"))
}

#[async_trait::async_trait]
impl SwiftClientLike for SwiftClientMemory {
  #[instrument(skip(self, request), fields(username = %request.username))]
  async fn authenticate(
    &self,
    request: &AuthRequest,
  ) -> ClientResult<AuthSession> {
    self.inner.counters.authenticate.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.inner.auth_delay.get() {
      tokio::time::sleep(delay).await;
    }

    let mut cluster = self.inner.cluster.write().await;
    if cluster.reject_auth
      || request.username != self.inner.username
      || request.key != self.inner.key
    {
      return Err(ClientError::Unauthorized(miette::miette!(
        "invalid credentials for user `{}`",
        request.username
      )));
    }

    cluster.token_seq += 1;
    let token = format!("tk_memory_{}", cluster.token_seq);
    cluster.tokens.insert(token.clone());

    let expires_at = self
      .inner
      .token_ttl
      .get()
      .and_then(|ttl| expiry_after(Utc::now(), ttl));

    Ok(
      AuthSession::new(token, self.inner.storage_url.clone())
        .with_expiry(expires_at)
        .with_region(request.region.clone()),
    )
  }

  #[instrument(skip(self, session))]
  async fn head_container(
    &self,
    session: &AuthSession,
    container: &str,
  ) -> ClientResult<ContainerMetadata> {
    self.inner.counters.head_container.fetch_add(1, Ordering::SeqCst);
    let cluster = self.inner.cluster.read().await;
    Self::authorize(&cluster, session)?;

    let stored = Self::container(&cluster, container)?;
    Ok(ContainerMetadata {
      object_count: stored.objects.len() as u64,
      bytes_used:   stored
        .objects
        .values()
        .map(|o| o.data.len() as u64)
        .sum(),
      read_acl:     stored.options.read_acl.clone(),
    })
  }

  #[instrument(skip(self, session))]
  async fn put_container(
    &self,
    session: &AuthSession,
    container: &str,
    options: &ContainerOptions,
  ) -> ClientResult<()> {
    self.inner.counters.put_container.fetch_add(1, Ordering::SeqCst);
    let mut cluster = self.inner.cluster.write().await;
    Self::authorize(&cluster, session)?;

    // re-creating an existing container only updates its metadata
    let stored = cluster.containers.entry(container.to_owned()).or_default();
    if options.read_acl.is_some() {
      stored.options.read_acl.clone_from(&options.read_acl);
    }
    if options.allow_origin.is_some() {
      stored.options.allow_origin.clone_from(&options.allow_origin);
    }
    Ok(())
  }

  #[instrument(skip(self, session, data))]
  async fn put_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
    data: RequestStream,
    options: UploadOptions,
  ) -> ClientResult<()> {
    self.count_object_call();
    {
      let cluster = self.inner.cluster.read().await;
      Self::authorize(&cluster, session)?;
      Self::container(&cluster, container)?;
    }

    let data = data
      .try_fold(BytesMut::new(), |mut acc, chunk| async move {
        acc.extend_from_slice(&chunk);
        Ok(acc)
      })
      .await
      .map_err(|e| ClientError::Stream(miette::miette!(e)))?
      .freeze();

    if let Some(expected) = options.content_length {
      if expected != data.len() as u64 {
        return Err(ClientError::Stream(miette::miette!(
          "declared content length {expected} but received {}",
          data.len()
        )));
      }
    }

    let object = StoredObject::new(data, options.content_type);
    let mut cluster = self.inner.cluster.write().await;
    cluster
      .containers
      .get_mut(container)
      .ok_or_else(|| ClientError::NotFound(container.to_owned()))?
      .objects
      .insert(name.as_str().to_owned(), object);
    Ok(())
  }

  #[instrument(skip(self, session))]
  async fn get_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<(ObjectMetadata, ResponseStream)> {
    self.count_object_call();
    let cluster = self.inner.cluster.read().await;
    Self::authorize(&cluster, session)?;

    let object = Self::container(&cluster, container)?
      .objects
      .get(name.as_str())
      .ok_or_else(|| object_not_found(container, name))?;

    let data = object.data.clone();
    let stream: ResponseStream = Box::pin(stream::once(async move { Ok(data) }));
    Ok((object.metadata(), stream))
  }

  #[instrument(skip(self, session))]
  async fn head_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<ObjectMetadata> {
    self.count_object_call();
    let cluster = self.inner.cluster.read().await;
    Self::authorize(&cluster, session)?;

    Self::container(&cluster, container)?
      .objects
      .get(name.as_str())
      .map(StoredObject::metadata)
      .ok_or_else(|| object_not_found(container, name))
  }

  #[instrument(skip(self, session))]
  async fn delete_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<()> {
    self.count_object_call();
    let mut cluster = self.inner.cluster.write().await;
    Self::authorize(&cluster, session)?;

    cluster
      .containers
      .get_mut(container)
      .ok_or_else(|| ClientError::NotFound(container.to_owned()))?
      .objects
      .remove(name.as_str())
      .map(|_| ())
      .ok_or_else(|| object_not_found(container, name))
  }

  #[instrument(skip(self, session))]
  async fn list_objects(
    &self,
    session: &AuthSession,
    container: &str,
    query: &ListQuery,
  ) -> ClientResult<Vec<ListEntry>> {
    self.count_object_call();
    let cluster = self.inner.cluster.read().await;
    Self::authorize(&cluster, session)?;

    let prefix = query.prefix.as_deref().unwrap_or_default();
    let mut entries = Vec::new();
    let mut last_subdir: Option<String> = None;

    for (name, object) in &Self::container(&cluster, container)?.objects {
      let Some(rest) = name.strip_prefix(prefix) else {
        continue;
      };

      // roll up everything past the first delimiter into a subdir
      if let Some(idx) = query.delimiter.and_then(|d| rest.find(d)) {
        let subdir = format!("{prefix}{}", &rest[..=idx]);
        if last_subdir.as_ref() != Some(&subdir) {
          last_subdir = Some(subdir.clone());
          entries.push(ListEntry::Subdir(subdir));
        }
        continue;
      }

      entries.push(ListEntry::Object(ObjectEntry {
        name:          ObjectName::new(name.clone()),
        size:          object.data.len() as u64,
        etag:          Some(object.etag.clone()),
        content_type:  object.content_type.clone(),
        last_modified: Some(object.last_modified),
      }));
    }

    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use futures::StreamExt;
  use swift_core::auth::EndpointType;

  use super::*;

  fn client() -> SwiftClientMemory {
    SwiftClientMemory::new(
      Url::parse("http://10.0.2.2:8080/v1/AUTH_012345abcd").unwrap(),
      "user",
      "password",
    )
  }

  fn request(key: &str) -> AuthRequest {
    AuthRequest {
      auth_url:       Url::parse("http://10.0.2.2:8080/auth/v1.0").unwrap(),
      version:        swift_core::AuthVersion::V1,
      username:       "user".into(),
      key:            key.into(),
      project:        None,
      user_domain:    None,
      project_domain: None,
      region:         None,
      endpoint_type:  EndpointType::Public,
      service_type:   "object-store".into(),
    }
  }

  fn bytes_stream(data: &'static [u8]) -> RequestStream {
    Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
  }

  #[tokio::test]
  async fn test_authenticate() {
    let client = client();
    let session = client.authenticate(&request("password")).await.unwrap();
    assert_eq!(
      session.storage_url().as_str(),
      "http://10.0.2.2:8080/v1/AUTH_012345abcd"
    );
    assert!(session.expires_at().is_none());

    let result = client.authenticate(&request("wrong")).await;
    assert!(matches!(result, Err(ClientError::Unauthorized(_))));
    assert_eq!(client.calls().authenticate, 2);
  }

  #[tokio::test]
  async fn test_token_ttl() {
    let client = client().with_token_ttl(Duration::from_secs(60));
    let session = client.authenticate(&request("password")).await.unwrap();
    assert!(session.expires_at().unwrap() > Utc::now());
  }

  #[tokio::test]
  async fn test_settings_reach_existing_clones() {
    let client = client();
    let clone = client.clone();
    let _client = client.with_token_ttl(Duration::from_secs(60));

    let session = clone.authenticate(&request("password")).await.unwrap();
    assert!(session.expires_at().is_some());
  }

  #[tokio::test]
  async fn test_unrepresentable_token_ttl_means_no_expiry() {
    let client = client().with_token_ttl(Duration::MAX);
    let session = client.authenticate(&request("password")).await.unwrap();
    assert_eq!(session.expires_at(), None);
  }

  #[tokio::test]
  async fn test_put_and_get() {
    let client = client();
    client.create_container("django").await;
    let session = client.authenticate(&request("password")).await.unwrap();
    let name = ObjectName::new("a.png");

    client
      .put_object(
        &session,
        "django",
        &name,
        bytes_stream(b"hello world"),
        UploadOptions {
          content_type:   Some("image/png".to_string()),
          content_length: Some(11),
        },
      )
      .await
      .unwrap();

    let (metadata, mut stream) =
      client.get_object(&session, "django", &name).await.unwrap();
    assert_eq!(metadata.size, 11);
    assert_eq!(metadata.content_type.as_deref(), Some("image/png"));
    assert_eq!(
      metadata.etag.as_deref(),
      Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );
    assert_eq!(stream.next().await.unwrap().unwrap(), "hello world");
  }

  #[tokio::test]
  async fn test_revoked_token_is_rejected() {
    let client = client();
    client.create_container("django").await;
    let session = client.authenticate(&request("password")).await.unwrap();
    client.revoke_tokens().await;

    let result = client.head_container(&session, "django").await;
    assert!(matches!(result, Err(ClientError::Unauthorized(_))));
  }

  #[tokio::test]
  async fn test_list_with_delimiter() {
    let client = client();
    client.create_container("c").await;
    let session = client.authenticate(&request("password")).await.unwrap();
    for name in ["css/a.css", "images/a.png", "images/b.png", "root.txt"] {
      client
        .put_object(
          &session,
          "c",
          &ObjectName::new(name),
          bytes_stream(b"x"),
          UploadOptions::default(),
        )
        .await
        .unwrap();
    }

    let entries = client
      .list_objects(&session, "c", &ListQuery {
        prefix:       None,
        delimiter:    Some('/'),
        full_listing: true,
      })
      .await
      .unwrap();
    let subdirs: Vec<_> = entries
      .iter()
      .filter_map(|e| match e {
        ListEntry::Subdir(s) => Some(s.as_str()),
        ListEntry::Object(_) => None,
      })
      .collect();
    assert_eq!(subdirs, ["css/", "images/"]);
    assert_eq!(entries.len(), 3);

    let images = client
      .list_objects(&session, "c", &ListQuery {
        prefix:       Some("images/".into()),
        delimiter:    Some('/'),
        full_listing: true,
      })
      .await
      .unwrap();
    assert_eq!(images.len(), 2);
  }

  #[tokio::test]
  async fn test_delete_missing_object() {
    let client = client();
    client.create_container("c").await;
    let session = client.authenticate(&request("password")).await.unwrap();

    let result = client
      .delete_object(&session, "c", &ObjectName::new("nope"))
      .await;
    assert!(matches!(result, Err(ClientError::NotFound(_))));
  }
}
