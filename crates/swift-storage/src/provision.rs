//! Lazy, once-only container verification and creation.

use std::sync::atomic::{AtomicBool, Ordering};

use swift_core::{
  AuthSession, ClientError, ContainerOptions, SwiftClientLike,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProvisionError;

/// Read ACL granting anonymous access to every object.
pub const PUBLIC_READ_ACL: &str = ".r:*";

/// What is known and configured about the backing container.
#[derive(Debug)]
pub struct ContainerState {
  /// Container name.
  pub name:             String,
  /// Create the container when it is missing.
  pub auto_create:      bool,
  /// Grant public read on creation.
  pub public_on_create: bool,
  /// CORS origin to allow on creation.
  pub allow_origin:     Option<String>,
  verified:             AtomicBool,
}

impl ContainerState {
  /// Creates an unverified state.
  #[must_use]
  pub const fn new(
    name: String,
    auto_create: bool,
    public_on_create: bool,
    allow_origin: Option<String>,
  ) -> Self {
    Self {
      name,
      auto_create,
      public_on_create,
      allow_origin,
      verified: AtomicBool::new(false),
    }
  }

  /// Whether the container has been seen or created.
  #[must_use]
  pub fn is_verified(&self) -> bool { self.verified.load(Ordering::Acquire) }

  fn create_options(&self) -> ContainerOptions {
    ContainerOptions {
      read_acl:     self
        .public_on_create
        .then(|| PUBLIC_READ_ACL.to_owned()),
      allow_origin: self.allow_origin.clone(),
    }
  }
}

/// Makes sure the container exists before the first object call.
#[derive(Debug)]
pub struct ContainerProvisioner {
  state: ContainerState,
  lock:  Mutex<()>,
}

impl ContainerProvisioner {
  /// Wraps an unverified [`ContainerState`].
  #[must_use]
  pub fn new(state: ContainerState) -> Self {
    Self {
      state,
      lock: Mutex::new(()),
    }
  }

  /// The container this provisioner manages.
  #[must_use]
  pub const fn state(&self) -> &ContainerState { &self.state }

  /// Checks for the container, creating it if configured to. Once this has
  /// succeeded it returns immediately without I/O.
  #[instrument(skip_all, fields(container = %self.state.name), err)]
  pub async fn ensure_container(
    &self,
    client: &dyn SwiftClientLike,
    session: &AuthSession,
  ) -> Result<(), ProvisionError> {
    if self.state.is_verified() {
      return Ok(());
    }

    let _guard = self.lock.lock().await;
    if self.state.is_verified() {
      return Ok(());
    }

    let container = &self.state.name;
    debug!("Checking container");
    match client.head_container(session, container).await {
      Ok(_) => {
        debug!("Container exists");
      }
      Err(ClientError::NotFound(_)) if self.state.auto_create => {
        let options = self.state.create_options();
        debug!(?options, "Container missing, creating it");
        client
          .put_container(session, container, &options)
          .await
          .map_err(|source| {
            error!(error = %source, "Failed to create container");
            ProvisionError::CreateFailed {
              container: container.clone(),
              source,
            }
          })?;
        info!("Container created");
      }
      Err(ClientError::NotFound(_)) => {
        warn!("Container is missing and auto-creation is disabled");
        return Err(ProvisionError::NotFound {
          container: container.clone(),
        });
      }
      Err(source) => {
        return Err(ProvisionError::Check {
          container: container.clone(),
          source,
        });
      }
    }

    self.state.verified.store(true, Ordering::Release);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use swift_core::{AuthRequest, auth::EndpointType};
  use swift_impl_memory::SwiftClientMemory;
  use url::Url;

  use super::*;

  async fn setup() -> (SwiftClientMemory, AuthSession) {
    let client = SwiftClientMemory::new(
      Url::parse("http://10.0.2.2:8080/v1/AUTH_012345abcd").unwrap(),
      "user",
      "password",
    );
    let session = client
      .authenticate(&AuthRequest {
        auth_url:       Url::parse("http://10.0.2.2:8080/auth/v1.0").unwrap(),
        version:        swift_core::AuthVersion::V1,
        username:       "user".into(),
        key:            "password".into(),
        project:        None,
        user_domain:    None,
        project_domain: None,
        region:         None,
        endpoint_type:  EndpointType::Public,
        service_type:   "object-store".into(),
      })
      .await
      .unwrap();
    (client, session)
  }

  fn provisioner(auto_create: bool, public: bool) -> ContainerProvisioner {
    ContainerProvisioner::new(ContainerState::new(
      "django".into(),
      auto_create,
      public,
      Some("https://example.com".into()),
    ))
  }

  #[tokio::test]
  async fn test_existing_container_is_checked_once() {
    let (client, session) = setup().await;
    client.create_container("django").await;
    let provisioner = provisioner(false, false);

    provisioner.ensure_container(&client, &session).await.unwrap();
    provisioner.ensure_container(&client, &session).await.unwrap();

    assert!(provisioner.state().is_verified());
    let calls = client.calls();
    assert_eq!(calls.head_container, 1);
    assert_eq!(calls.put_container, 0);
  }

  #[tokio::test]
  async fn test_missing_container_without_auto_create() {
    let (client, session) = setup().await;
    let provisioner = provisioner(false, false);

    let result = provisioner.ensure_container(&client, &session).await;
    assert!(matches!(result, Err(ProvisionError::NotFound { .. })));
    assert!(!provisioner.state().is_verified());
  }

  #[tokio::test]
  async fn test_auto_create_sets_headers() {
    let (client, session) = setup().await;
    let provisioner = provisioner(true, true);

    provisioner.ensure_container(&client, &session).await.unwrap();
    provisioner.ensure_container(&client, &session).await.unwrap();

    let options = client.container_options("django").await.unwrap();
    assert_eq!(options.read_acl.as_deref(), Some(".r:*"));
    assert_eq!(options.allow_origin.as_deref(), Some("https://example.com"));
    assert_eq!(client.calls().put_container, 1);
  }

  #[tokio::test]
  async fn test_private_auto_create_has_no_acl() {
    let (client, session) = setup().await;
    provisioner(true, false)
      .ensure_container(&client, &session)
      .await
      .unwrap();

    let options = client.container_options("django").await.unwrap();
    assert_eq!(options.read_acl, None);
  }

  #[tokio::test]
  async fn test_rejected_token_is_reported() {
    let (client, session) = setup().await;
    client.revoke_tokens().await;

    let result = provisioner(true, false)
      .ensure_container(&client, &session)
      .await;
    assert!(result.as_ref().is_err_and(ProvisionError::is_unauthorized));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_first_callers_check_once() {
    let (client, session) = setup().await;
    client.create_container("django").await;
    let provisioner = Arc::new(provisioner(false, false));
    let session = Arc::new(session);

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let provisioner = provisioner.clone();
        let client = client.clone();
        let session = session.clone();
        tokio::spawn(async move {
          provisioner.ensure_container(&client, &session).await
        })
      })
      .collect();
    for handle in handles {
      handle.await.unwrap().unwrap();
    }

    assert_eq!(client.calls().head_container, 1);
  }
}
