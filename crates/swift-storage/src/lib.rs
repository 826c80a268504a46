//! Frontend for storing files in an OpenStack Swift container.
//!
//! [`SwiftStorage`] turns file operations into object calls against one
//! container. It authenticates on demand, keeps the token until it expires
//! or is rejected, provisions the container on first use and derives public
//! or temporary URLs for stored objects.

mod config;
mod error;
mod provision;
mod session;

use std::{fmt, future::Future, sync::Arc};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::{TryStreamExt, stream};
use miette::Report;
use swift_core::{
  AuthSession, ClientError, ClientResult, ListEntry, ListQuery,
  RequestStream, SwiftClientLike, UploadOptions,
};
use swift_impl_http::SwiftClientHttp;
use swift_impl_memory::SwiftClientMemory;
use swift_url::{
  BaseUrlSpec, SigningUnavailable, TempUrlConfig, TempUrlMethod,
};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub use self::{
  config::{ConfigError, StorageRole, SwiftConfig},
  error::{
    ProvisionError, StorageError, StorageResult, TransportError, UrlError,
  },
  provision::{ContainerProvisioner, ContainerState, PUBLIC_READ_ACL},
  session::SessionCache,
};
use self::config::{Settings, UrlBase};
pub use swift_core::{Bytes, ObjectMetadata, ObjectName};

/// Content type of pseudo-directory marker objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// A downloaded object.
#[derive(Debug, Clone)]
pub struct SwiftFile {
  /// The final path component of the object name.
  pub name:     String,
  /// The object's content.
  pub content:  Bytes,
  /// Size, hash, type and modification time.
  pub metadata: ObjectMetadata,
}

/// Options for [`SwiftStorage::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
  /// Content type to store with the object.
  pub content_type: Option<String>,
}

/// Why an attempt against the cluster did not succeed.
enum Failure {
  Rejected(Report),
  Provision(ProvisionError),
  Client(ClientError),
}

impl Failure {
  fn into_storage_error(self, name: &ObjectName) -> StorageError {
    match self {
      Self::Rejected(report) => StorageError::Auth(report),
      Self::Provision(e) => StorageError::Provision(e),
      Self::Client(e) => StorageError::from_client(e, name),
    }
  }
}

/// File storage backed by one Swift container.
pub struct SwiftStorage {
  client:       Arc<dyn SwiftClientLike>,
  role:         StorageRole,
  sessions:     SessionCache,
  provisioner:  ContainerProvisioner,
  url_base:     UrlBase,
  name_prefix:  String,
  temp_urls:    Option<TempUrlConfig>,
  full_listing: bool,
}

impl fmt::Debug for SwiftStorage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SwiftStorage")
      .field("client", &format_args!("_"))
      .field("role", &self.role)
      .field("container", &self.container())
      .field("name_prefix", &self.name_prefix)
      .finish_non_exhaustive()
  }
}

impl SwiftStorage {
  /// Creates a storage talking to `client`. Unless `lazy_connect` is set
  /// this authenticates and provisions the container right away.
  pub async fn new(
    client: Arc<dyn SwiftClientLike>,
    config: &SwiftConfig,
    role: StorageRole,
  ) -> StorageResult<Self> {
    let settings = config.resolve(role)?;
    Self::from_settings(client, settings, role).await
  }

  /// Creates a storage backed by a real cluster over HTTP.
  pub async fn new_http(
    config: &SwiftConfig,
    role: StorageRole,
  ) -> StorageResult<Self> {
    let settings = config.resolve(role)?;
    let client = SwiftClientHttp::new(settings.timeout).map_err(|e| {
      ConfigError::Client(Report::from_err(e).context("building HTTP client"))
    })?;
    Self::from_settings(Arc::new(client), settings, role).await
  }

  /// Creates a storage backed by an in-memory cluster.
  pub async fn new_memory(
    client: SwiftClientMemory,
    config: &SwiftConfig,
    role: StorageRole,
  ) -> StorageResult<Self> {
    Self::new(Arc::new(client), config, role).await
  }

  #[instrument(
    skip_all,
    fields(role = ?role, container = %settings.container)
  )]
  async fn from_settings(
    client: Arc<dyn SwiftClientLike>,
    settings: Settings,
    role: StorageRole,
  ) -> StorageResult<Self> {
    let lazy = settings.lazy_connect;
    let storage = Self {
      sessions: SessionCache::new(
        client.clone(),
        settings.auth,
        settings.fallback_ttl,
      ),
      provisioner: ContainerProvisioner::new(ContainerState::new(
        settings.container,
        settings.auto_create,
        settings.public_on_create,
        settings.allow_origin,
      )),
      client,
      role,
      url_base: settings.url_base,
      name_prefix: settings.name_prefix,
      temp_urls: settings.temp_urls,
      full_listing: settings.full_listing,
    };

    if lazy {
      debug!("Deferring connection to the first operation");
    } else {
      storage.connect().await?;
    }

    info!("Swift storage initialized");
    Ok(storage)
  }

  /// Authenticates and makes sure the container exists.
  pub async fn connect(&self) -> StorageResult<()> {
    self
      .authorized(&ObjectName::new(""), |_session| async { Ok(()) })
      .await
  }

  /// The role this storage serves.
  #[must_use]
  pub const fn role(&self) -> StorageRole { self.role }

  /// The container objects are stored in.
  #[must_use]
  pub fn container(&self) -> &str { &self.provisioner.state().name }

  /// The prefix added to every object name.
  #[must_use]
  pub fn name_prefix(&self) -> &str { &self.name_prefix }

  /// The session cache, for callers that need the token itself.
  #[must_use]
  pub const fn sessions(&self) -> &SessionCache { &self.sessions }

  /// The name as stored, prefix included. Names with a `.` or `..`
  /// component are refused since URL parsing would collapse them.
  fn stored_name(&self, name: &ObjectName) -> StorageResult<ObjectName> {
    let stored = name.with_prefix(&self.name_prefix);
    if stored.has_dot_segment() {
      warn!(name = %name, "Refusing name with a dot component");
      return Err(StorageError::SuspiciousName(format!(
        "`{name}` contains a `.` or `..` path component"
      )));
    }
    Ok(stored)
  }

  async fn attempt<T, F, Fut>(
    &self,
    session: &Arc<AuthSession>,
    op: &F,
  ) -> Result<T, Failure>
  where
    F: Fn(Arc<AuthSession>) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
  {
    self
      .provisioner
      .ensure_container(self.client.as_ref(), session)
      .await
      .map_err(|e| {
        if e.is_unauthorized() {
          Failure::Rejected(Report::from_err(e))
        } else {
          Failure::Provision(e)
        }
      })?;

    op(session.clone()).await.map_err(|e| match e {
      ClientError::Unauthorized(report) => Failure::Rejected(report),
      e => Failure::Client(e),
    })
  }

  /// Runs `op` with a valid session against a verified container. A
  /// rejected token is refreshed and the call retried exactly once.
  async fn authorized<T, F, Fut>(
    &self,
    name: &ObjectName,
    op: F,
  ) -> StorageResult<T>
  where
    F: Fn(Arc<AuthSession>) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
  {
    let mut session = self.sessions.ensure_session(false).await?;
    let mut retried = false;

    loop {
      match self.attempt(&session, &op).await {
        Err(Failure::Rejected(report)) if !retried => {
          warn!(error = %report, "Token rejected, refreshing once");
          retried = true;
          session = self.sessions.replace_rejected(&session).await?;
        }
        Err(Failure::Rejected(report)) => {
          error!(error = %report, "Fresh token rejected");
          return Err(StorageError::Auth(report));
        }
        result => return result.map_err(|f| f.into_storage_error(name)),
      }
    }
  }

  /// Downloads an object.
  #[instrument(skip(self), fields(name = %name), err)]
  pub async fn open(&self, name: &ObjectName) -> StorageResult<SwiftFile> {
    let client = self.client.as_ref();
    let container = self.container();
    let object = &self.stored_name(name)?;

    let (metadata, stream) = self
      .authorized(name, move |session| async move {
        client.get_object(&session, container, object).await
      })
      .await?;

    let content = stream
      .try_fold(BytesMut::new(), |mut acc, chunk| async move {
        acc.extend_from_slice(&chunk);
        Ok(acc)
      })
      .await
      .map_err(|e| {
        error!(error = %e, "Failed to read object stream");
        StorageError::from_client(e, name)
      })?
      .freeze();

    debug!(size = content.len(), "Object downloaded");
    Ok(SwiftFile {
      name: name.basename().to_owned(),
      content,
      metadata,
    })
  }

  /// Uploads `content` under `name`, replacing any existing object, and
  /// returns the name it was stored under.
  #[instrument(
    skip(self, content),
    fields(name = %name, content_type = ?options.content_type),
    err
  )]
  pub async fn save(
    &self,
    name: &ObjectName,
    content: Bytes,
    options: SaveOptions,
  ) -> StorageResult<ObjectName> {
    let client = self.client.as_ref();
    let container = self.container();
    let object = &self.stored_name(name)?;
    let content_length = Some(content.len() as u64);

    self
      .authorized(name, move |session| {
        let data = content.clone();
        let upload = UploadOptions {
          content_type: options.content_type.clone(),
          content_length,
        };
        async move {
          let data: RequestStream =
            Box::pin(stream::once(async move { Ok(data) }));
          client
            .put_object(&session, container, object, data, upload)
            .await
        }
      })
      .await?;

    info!("Object saved");
    Ok(name.clone())
  }

  /// Deletes an object. Deleting a missing object succeeds.
  #[instrument(skip(self), fields(name = %name), err)]
  pub async fn delete(&self, name: &ObjectName) -> StorageResult<()> {
    let client = self.client.as_ref();
    let container = self.container();
    let object = &self.stored_name(name)?;

    let result = self
      .authorized(name, move |session| async move {
        client.delete_object(&session, container, object).await
      })
      .await;

    match result {
      Err(StorageError::NotFound(_)) => {
        debug!("Object was already absent");
        Ok(())
      }
      other => other,
    }
  }

  /// Fetches an object's metadata without its content.
  #[instrument(skip(self), fields(name = %name), err)]
  pub async fn head(
    &self,
    name: &ObjectName,
  ) -> StorageResult<ObjectMetadata> {
    let client = self.client.as_ref();
    let container = self.container();
    let object = &self.stored_name(name)?;

    self
      .authorized(name, move |session| async move {
        client.head_object(&session, container, object).await
      })
      .await
  }

  /// Whether an object exists.
  pub async fn exists(&self, name: &ObjectName) -> StorageResult<bool> {
    match self.head(name).await {
      Ok(_) => Ok(true),
      Err(StorageError::NotFound(_)) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// The object's size in bytes.
  pub async fn size(&self, name: &ObjectName) -> StorageResult<u64> {
    Ok(self.head(name).await?.size)
  }

  /// When the object was last written.
  pub async fn modified_time(
    &self,
    name: &ObjectName,
  ) -> StorageResult<DateTime<Utc>> {
    self.head(name).await?.last_modified.ok_or_else(|| {
      StorageError::Transport(TransportError::Protocol(miette::miette!(
        "no last-modified time reported for `{name}`"
      )))
    })
  }

  async fn list(
    &self,
    prefix: &str,
    delimiter: Option<char>,
    full_listing: bool,
  ) -> StorageResult<Vec<ListEntry>> {
    let client = self.client.as_ref();
    let container = self.container();
    let query = &ListQuery {
      prefix: (!prefix.is_empty()).then(|| prefix.to_owned()),
      delimiter,
      full_listing,
    };

    self
      .authorized(&ObjectName::new(prefix), move |session| async move {
        client.list_objects(&session, container, query).await
      })
      .await
  }

  /// Lists the pseudo-directories and files directly below `path`, as
  /// `(dirs, files)` relative to it.
  #[instrument(skip(self), err)]
  pub async fn listdir(
    &self,
    path: &str,
  ) -> StorageResult<(Vec<String>, Vec<String>)> {
    let path = path.trim_matches('/');
    let prefix = if path.is_empty() {
      self.name_prefix.clone()
    } else {
      format!("{}{path}/", self.name_prefix)
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in self.list(&prefix, Some('/'), self.full_listing).await? {
      match entry {
        ListEntry::Subdir(subdir) => dirs.extend(
          subdir
            .strip_prefix(&prefix)
            .map(|dir| dir.trim_end_matches('/'))
            .filter(|dir| !dir.is_empty())
            .map(ToOwned::to_owned),
        ),
        // the directory's own marker object strips to ""
        ListEntry::Object(object) => files.extend(
          object
            .name
            .as_str()
            .strip_prefix(&prefix)
            .filter(|file| !file.is_empty())
            .map(ToOwned::to_owned),
        ),
      }
    }

    debug!(dirs = dirs.len(), files = files.len(), "Listed directory");
    Ok((dirs, files))
  }

  /// Deletes every object below `path`, including its marker.
  #[instrument(skip(self), err)]
  pub async fn rmtree(&self, path: &str) -> StorageResult<()> {
    let path = path.trim_matches('/');
    let prefix = if path.is_empty() {
      self.name_prefix.clone()
    } else {
      format!("{}{path}/", self.name_prefix)
    };

    let entries = self.list(&prefix, None, true).await?;
    let mut deleted = 0_usize;
    for entry in entries {
      let ListEntry::Object(object) = entry else {
        continue;
      };
      if object.name.has_dot_segment() {
        warn!(name = %object.name, "Skipping object that cannot be addressed");
        continue;
      }
      let name = object
        .name
        .strip_prefix(&self.name_prefix)
        .unwrap_or(object.name);
      self.delete(&name).await?;
      deleted += 1;
    }

    info!(deleted, "Removed tree");
    Ok(())
  }

  /// Creates a pseudo-directory marker for `path`.
  #[instrument(skip(self), err)]
  pub async fn makedirs(&self, path: &str) -> StorageResult<()> {
    let path = path.trim_matches('/');
    if path.is_empty() {
      return Ok(());
    }

    self
      .save(
        &ObjectName::new(format!("{path}/")),
        Bytes::new(),
        SaveOptions {
          content_type: Some(DIRECTORY_CONTENT_TYPE.to_owned()),
        },
      )
      .await
      .map(drop)
  }

  /// The URL clients should use to fetch `name`: a signed temporary URL
  /// if temporary URLs are enabled, the plain public URL otherwise.
  #[instrument(skip(self), fields(name = %name), err)]
  pub async fn url(&self, name: &ObjectName) -> Result<Url, UrlError> {
    if self.temp_urls.as_ref().is_some_and(|t| !t.can_sign()) {
      error!("Temporary URL requested without a signing key");
      return Err(SigningUnavailable.into());
    }

    let object = self.stored_name(name)?;
    let location = match &self.url_base {
      UrlBase::Fixed(spec) => spec.locate(self.container(), &object)?,
      UrlBase::Auto(override_url) => {
        // links must point at a container that exists
        let session = self
          .authorized(name, |session| async move { Ok(session) })
          .await?;
        BaseUrlSpec::resolve(session.storage_url(), override_url.as_ref())?
          .locate(self.container(), &object)?
      }
    };

    match &self.temp_urls {
      Some(temp_urls) => {
        Ok(temp_urls.signed_url(&location, TempUrlMethod::Get, Utc::now())?)
      }
      None => Ok(location.url),
    }
  }

  /// Sanitises a user-supplied file name: surrounding whitespace is
  /// trimmed, spaces become `_` and anything outside `[-_./]` and word
  /// characters is dropped.
  #[must_use]
  pub fn valid_name(name: &str) -> String { swift_types::valid_name(name) }

  /// Returns a name close to `name` that is free and at most `max_length`
  /// characters long.
  ///
  /// Static storage always returns `name` unchanged, so that collected
  /// assets overwrite their previous versions.
  #[instrument(skip(self), fields(name = %name), err)]
  pub async fn available_name(
    &self,
    name: &ObjectName,
    max_length: Option<usize>,
  ) -> StorageResult<ObjectName> {
    if self.role == StorageRole::Static {
      return Ok(name.clone());
    }

    let (dir, file) = match name.as_str().rsplit_once('/') {
      Some((dir, file)) => (Some(dir), file),
      None => (None, name.as_str()),
    };
    let (mut root, ext) = split_extension(file);
    let candidate_for = |root: &str| {
      let file = format!("{root}_{}{ext}", random_suffix());
      match dir {
        Some(dir) => ObjectName::new(format!("{dir}/{file}")),
        None => ObjectName::new(file),
      }
    };
    let too_long = |candidate: &ObjectName| {
      max_length.is_some_and(|max| candidate.as_str().chars().count() > max)
    };

    let mut candidate = name.clone();
    while too_long(&candidate) || self.exists(&candidate).await? {
      candidate = candidate_for(&root);
      let Some(max) = max_length else { continue };

      let truncation = candidate.as_str().chars().count().saturating_sub(max);
      if truncation > 0 {
        let keep = root.chars().count().saturating_sub(truncation);
        if keep == 0 {
          warn!(max_length = max, "No free name fits the length limit");
          return Err(StorageError::SuspiciousName(format!(
            "`{name}` cannot be made unique within {max} characters"
          )));
        }
        root = root.chars().take(keep).collect();
        candidate = candidate_for(&root);
      }
    }

    debug!(available = %candidate, "Found available name");
    Ok(candidate)
  }
}

/// Splits `file` into stem and extension, keeping leading dots in the stem.
fn split_extension(file: &str) -> (String, &str) {
  match file.rfind('.') {
    Some(idx) if !file[..idx].trim_start_matches('.').is_empty() => {
      (file[..idx].to_owned(), &file[idx..])
    }
    _ => (file.to_owned(), ""),
  }
}

/// Seven lowercase characters from the random part of a fresh ULID.
fn random_suffix() -> String {
  let id = ulid::Ulid::new().to_string();
  id[id.len() - 7..].to_ascii_lowercase()
}
