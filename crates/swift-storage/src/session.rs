//! Token caching with serialised refresh.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use miette::Report;
use swift_core::{
  AuthRequest, AuthSession, SwiftClientLike, expiry_after,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument};

use crate::error::{StorageError, StorageResult};

/// Caches one [`AuthSession`] and refreshes it at most once at a time.
pub struct SessionCache {
  client:       Arc<dyn SwiftClientLike>,
  request:      AuthRequest,
  fallback_ttl: Option<Duration>,
  current:      RwLock<Option<Arc<AuthSession>>>,
  refresh:      Mutex<()>,
}

impl std::fmt::Debug for SessionCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionCache")
      .field("request", &self.request)
      .field("fallback_ttl", &self.fallback_ttl)
      .finish_non_exhaustive()
  }
}

impl SessionCache {
  /// Creates an empty cache. `fallback_ttl` is the token lifetime assumed
  /// when the auth server does not report one.
  #[must_use]
  pub fn new(
    client: Arc<dyn SwiftClientLike>,
    request: AuthRequest,
    fallback_ttl: Option<Duration>,
  ) -> Self {
    Self {
      client,
      request,
      fallback_ttl,
      current: RwLock::new(None),
      refresh: Mutex::new(()),
    }
  }

  /// The cached session, if any, without touching the network.
  pub async fn current(&self) -> Option<Arc<AuthSession>> {
    self.current.read().await.clone()
  }

  /// Returns a usable session, authenticating if there is none, it has
  /// expired or `force` is set.
  pub async fn ensure_session(
    &self,
    force: bool,
  ) -> StorageResult<Arc<AuthSession>> {
    if force {
      let stale = self.current().await;
      self.obtain(stale.as_ref()).await
    } else {
      self.obtain(None).await
    }
  }

  /// Replaces `rejected` after the server refused it. If another caller has
  /// already replaced it, that replacement is returned instead.
  pub async fn replace_rejected(
    &self,
    rejected: &Arc<AuthSession>,
  ) -> StorageResult<Arc<AuthSession>> {
    self.obtain(Some(rejected)).await
  }

  fn reusable(
    session: &Arc<AuthSession>,
    rejected: Option<&Arc<AuthSession>>,
  ) -> bool {
    session.is_usable_at(Utc::now())
      && rejected.is_none_or(|rejected| !Arc::ptr_eq(rejected, session))
  }

  #[instrument(skip_all, fields(forced = rejected.is_some()), err)]
  async fn obtain(
    &self,
    rejected: Option<&Arc<AuthSession>>,
  ) -> StorageResult<Arc<AuthSession>> {
    let cached = self.current().await;
    if let Some(session) = cached.filter(|s| Self::reusable(s, rejected)) {
      return Ok(session);
    }

    let _guard = self.refresh.lock().await;

    // someone may have refreshed while we queued
    let cached = self.current().await;
    if let Some(session) = cached.filter(|s| Self::reusable(s, rejected)) {
      debug!("Reusing session refreshed by a concurrent caller");
      return Ok(session);
    }

    debug!("Requesting new token");
    let mut session =
      self.client.authenticate(&self.request).await.map_err(|e| {
        error!(error = %e, "Authentication failed");
        StorageError::Auth(Report::from_err(e))
      })?;

    if session.expires_at().is_none() {
      let fallback = self
        .fallback_ttl
        .and_then(|ttl| expiry_after(Utc::now(), ttl));
      session = session.with_expiry(fallback);
    }

    let session = Arc::new(session);
    *self.current.write().await = Some(session.clone());

    info!(
      storage_url = %session.storage_url(),
      expires_at = ?session.expires_at(),
      "Session refreshed"
    );
    Ok(session)
  }
}

#[cfg(test)]
mod tests {
  use swift_core::auth::EndpointType;
  use swift_impl_memory::SwiftClientMemory;
  use url::Url;

  use super::*;

  fn memory() -> SwiftClientMemory {
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

  #[tokio::test]
  async fn test_cached_session_is_reused() {
    let client = memory();
    let cache =
      SessionCache::new(Arc::new(client.clone()), request("password"), None);

    let first = cache.ensure_session(false).await.unwrap();
    let second = cache.ensure_session(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(client.calls().authenticate, 1);
  }

  #[tokio::test]
  async fn test_force_refreshes() {
    let client = memory();
    let cache =
      SessionCache::new(Arc::new(client.clone()), request("password"), None);

    let first = cache.ensure_session(false).await.unwrap();
    let second = cache.ensure_session(true).await.unwrap();
    assert_ne!(first.token(), second.token());
    assert_eq!(client.calls().authenticate, 2);
  }

  #[tokio::test]
  async fn test_expired_session_is_replaced() {
    let client = memory().with_token_ttl(Duration::ZERO);
    let cache =
      SessionCache::new(Arc::new(client.clone()), request("password"), None);

    cache.ensure_session(false).await.unwrap();
    cache.ensure_session(false).await.unwrap();
    assert_eq!(client.calls().authenticate, 2);
  }

  #[tokio::test]
  async fn test_fallback_ttl_only_without_server_expiry() {
    let cache = SessionCache::new(
      Arc::new(memory()),
      request("password"),
      Some(Duration::from_secs(60)),
    );
    let session = cache.ensure_session(false).await.unwrap();
    let expires_at = session.expires_at().unwrap();
    assert!(expires_at > Utc::now());
    assert!(expires_at <= Utc::now() + chrono::Duration::seconds(60));

    let server_ttl = Duration::from_secs(3600);
    let cache = SessionCache::new(
      Arc::new(memory().with_token_ttl(server_ttl)),
      request("password"),
      Some(Duration::from_secs(60)),
    );
    let session = cache.ensure_session(false).await.unwrap();
    assert!(
      session.expires_at().unwrap()
        > Utc::now() + chrono::Duration::seconds(600)
    );
  }

  #[tokio::test]
  async fn test_unrepresentable_fallback_ttl_means_no_expiry() {
    let cache = SessionCache::new(
      Arc::new(memory()),
      request("password"),
      Some(Duration::from_secs(10_000_000_000_000)),
    );
    let session = cache.ensure_session(false).await.unwrap();
    assert_eq!(session.expires_at(), None);
  }

  #[tokio::test]
  async fn test_failure_leaves_cache_untouched() {
    let client = memory();
    let cache =
      SessionCache::new(Arc::new(client.clone()), request("password"), None);
    let first = cache.ensure_session(false).await.unwrap();

    client.set_reject_auth(true).await;
    let result = cache.ensure_session(true).await;
    assert!(matches!(result, Err(StorageError::Auth(_))));

    let cached = cache.current().await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
  }

  #[tokio::test]
  async fn test_bad_credentials() {
    let cache = SessionCache::new(Arc::new(memory()), request("wrong"), None);
    assert!(matches!(
      cache.ensure_session(false).await,
      Err(StorageError::Auth(_))
    ));
    assert!(cache.current().await.is_none());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_single_refresh_under_concurrency() {
    let client = memory().with_auth_delay(Duration::from_millis(50));
    let cache = Arc::new(SessionCache::new(
      Arc::new(client.clone()),
      request("password"),
      None,
    ));

    let handles: Vec<_> = (0..16)
      .map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.ensure_session(false).await })
      })
      .collect();
    let mut tokens = Vec::new();
    for handle in handles {
      tokens.push(handle.await.unwrap().unwrap().token().to_owned());
    }

    assert_eq!(client.calls().authenticate, 1);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_rejections_refresh_once() {
    let client = memory().with_auth_delay(Duration::from_millis(20));
    let cache = Arc::new(SessionCache::new(
      Arc::new(client.clone()),
      request("password"),
      None,
    ));
    let stale = cache.ensure_session(false).await.unwrap();

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let cache = cache.clone();
        let stale = stale.clone();
        tokio::spawn(async move { cache.replace_rejected(&stale).await })
      })
      .collect();
    for handle in handles {
      let fresh = handle.await.unwrap().unwrap();
      assert!(!Arc::ptr_eq(&fresh, &stale));
    }

    assert_eq!(client.calls().authenticate, 2);
  }
}
