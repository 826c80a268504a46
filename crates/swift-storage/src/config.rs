//! Adapter configuration.

use std::{collections::HashMap, str::FromStr, time::Duration};

use chrono::Utc;
use serde::Deserialize;
use swift_core::{
  AuthRequest, AuthVersion, expiry_after,
  auth::{EndpointType, NameOrId, UnknownAuthVersion},
};
use swift_url::{
  BaseUrlSpec, ComposeError, InvalidTempUrlKey, TempUrlConfig, TempUrlDigest,
  TempUrlKey,
};
use tracing::warn;
use url::Url;

const DEFAULT_SERVICE_TYPE: &str = "object-store";

/// Which of the two storage configurations an adapter serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageRole {
  /// User uploads: `container_name`, `base_url`, `name_prefix`.
  #[default]
  Default,
  /// Static assets: `static_container_name`, `static_base_url`,
  /// `static_name_prefix`. Names are never rewritten and containers are
  /// created public.
  Static,
}

/// Errors raised while loading or validating a [`SwiftConfig`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ConfigError {
  /// A required setting is absent.
  #[error("missing required setting `{0}`")]
  Missing(&'static str),

  /// A setting has a value that cannot be used.
  #[error("invalid value for `{field}`: {reason}")]
  Invalid {
    /// The offending setting.
    field:  &'static str,
    /// Why it was rejected.
    reason: String,
  },

  /// A URL setting does not parse.
  #[error("`{field}` is not a valid URL")]
  InvalidUrl {
    /// The offending setting.
    field:  &'static str,
    /// Parse failure.
    #[source]
    source: url::ParseError,
  },

  /// A URL setting parses but cannot serve as a base URL.
  #[error("`{field}` cannot be used as a base URL")]
  BaseUrl {
    /// The offending setting.
    field:  &'static str,
    /// Why it was rejected.
    #[source]
    source: ComposeError,
  },

  /// The auth version is not one of 1, 2 or 3.
  #[error(transparent)]
  AuthVersion(#[from] UnknownAuthVersion),

  /// Keystone v2 needs a tenant.
  #[error("auth version 2 requires `tenant_name` or `tenant_id`")]
  MissingTenant,

  /// Keystone v3 needs a project and both domains.
  #[error("auth version 3 requires `{0}`")]
  MissingV3Scope(&'static str),

  /// `auto_base_url` is off but there is no base URL to use instead.
  #[error("`auto_base_url` is disabled but `{0}` is not set")]
  MissingBaseUrl(&'static str),

  /// The temp URL key is empty or not ASCII.
  #[error(transparent)]
  TempUrlKey(#[from] InvalidTempUrlKey),

  /// The HTTP client could not be built.
  #[error("HTTP client could not be configured: {0}")]
  Client(miette::Report),
}

/// Settings for a [`SwiftStorage`](crate::SwiftStorage).
///
/// Loaded from a file through [`Deserialize`] or from `SWIFT_*` environment
/// variables through [`SwiftConfig::from_env`]. Durations are in seconds.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SwiftConfig {
  /// Auth endpoint (`SWIFT_AUTH_URL`).
  pub auth_url:                           Option<String>,
  /// User name (`SWIFT_USERNAME`).
  pub username:                           Option<String>,
  /// Key or password (`SWIFT_KEY`).
  pub key:                                Option<String>,
  /// Auth protocol; detected from the credential fields when unset.
  pub auth_version:                       Option<AuthVersion>,
  /// Tenant (v2) or project (v3) name.
  pub tenant_name:                        Option<String>,
  /// Tenant (v2) or project (v3) id.
  pub tenant_id:                          Option<String>,
  /// User domain name (v3).
  pub user_domain_name:                   Option<String>,
  /// User domain id (v3).
  pub user_domain_id:                     Option<String>,
  /// Project domain name (v3).
  pub project_domain_name:                Option<String>,
  /// Project domain id (v3).
  pub project_domain_id:                  Option<String>,
  /// Preferred catalog region.
  pub region_name:                        Option<String>,
  /// Container for [`StorageRole::Default`].
  pub container_name:                     Option<String>,
  /// Container for [`StorageRole::Static`].
  pub static_container_name:              Option<String>,
  /// Create the container on first use if it is missing.
  pub auto_create_container:              bool,
  /// Grant public read (`.r:*`) to auto-created containers.
  pub auto_create_container_public:       bool,
  /// CORS origin to allow on auto-created containers.
  pub auto_create_container_allow_origin: Option<String>,
  /// Derive public URLs from the session's storage URL. When disabled the
  /// role's base URL is used verbatim as the container root.
  pub auto_base_url:                      bool,
  /// Base URL override for [`StorageRole::Default`].
  pub base_url:                           Option<String>,
  /// Base URL override for [`StorageRole::Static`].
  pub static_base_url:                    Option<String>,
  /// Prefix added to every object name of [`StorageRole::Default`].
  pub name_prefix:                        String,
  /// Prefix added to every object name of [`StorageRole::Static`].
  pub static_name_prefix:                 String,
  /// Hand out signed temporary URLs instead of plain ones.
  pub use_temp_urls:                      bool,
  /// Secret matching the account or container `Temp-URL-Key`.
  pub temp_url_key:                       Option<String>,
  /// Lifetime of generated temporary URLs.
  pub temp_url_duration:                  u64,
  /// HMAC digest for temporary URLs.
  pub temp_url_digest:                    TempUrlDigest,
  /// Token lifetime to assume when the auth server reports none.
  pub auth_token_duration:                Option<u64>,
  /// Follow listing pagination to the end.
  pub full_listing:                       bool,
  /// Defer authentication and container checks to the first operation.
  pub lazy_connect:                       bool,
  /// Per-request timeout.
  pub timeout:                            u64,
  /// Extra client options; `endpoint_type` and `service_type` are
  /// understood.
  pub extra_options:                      HashMap<String, String>,
}

impl Default for SwiftConfig {
  fn default() -> Self {
    Self {
      auth_url:                           None,
      username:                           None,
      key:                                None,
      auth_version:                       None,
      tenant_name:                        None,
      tenant_id:                          None,
      user_domain_name:                   None,
      user_domain_id:                     None,
      project_domain_name:                None,
      project_domain_id:                  None,
      region_name:                        None,
      container_name:                     None,
      static_container_name:              None,
      auto_create_container:              false,
      auto_create_container_public:       false,
      auto_create_container_allow_origin: None,
      auto_base_url:                      true,
      base_url:                           None,
      static_base_url:                    None,
      name_prefix:                        String::new(),
      static_name_prefix:                 String::new(),
      use_temp_urls:                      false,
      temp_url_key:                       None,
      temp_url_duration:                  1800,
      temp_url_digest:                    TempUrlDigest::default(),
      auth_token_duration:                None,
      full_listing:                       true,
      lazy_connect:                       false,
      timeout:                            30,
      extra_options:                      HashMap::new(),
    }
  }
}

impl std::fmt::Debug for SwiftConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SwiftConfig")
      .field("auth_url", &self.auth_url)
      .field("username", &self.username)
      .field("auth_version", &self.auth_version)
      .field("container_name", &self.container_name)
      .field("static_container_name", &self.static_container_name)
      .field("base_url", &self.base_url)
      .field("static_base_url", &self.static_base_url)
      .field("use_temp_urls", &self.use_temp_urls)
      .finish_non_exhaustive()
  }
}

/// How public URLs are rooted.
#[derive(Debug, Clone)]
pub(crate) enum UrlBase {
  /// From the session's storage URL, with an optional override.
  Auto(Option<Url>),
  /// A configured container root; no session needed.
  Fixed(BaseUrlSpec),
}

/// A validated [`SwiftConfig`] narrowed to one role.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
  pub auth:             AuthRequest,
  pub fallback_ttl:     Option<Duration>,
  pub container:        String,
  pub auto_create:      bool,
  pub public_on_create: bool,
  pub allow_origin:     Option<String>,
  pub url_base:         UrlBase,
  pub name_prefix:      String,
  pub temp_urls:        Option<TempUrlConfig>,
  pub full_listing:     bool,
  pub lazy_connect:     bool,
  pub timeout:          Duration,
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    other => Err(ConfigError::Invalid {
      field,
      reason: format!("`{other}` is not a boolean"),
    }),
  }
}

fn parse_secs(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
  raw.trim().parse().map_err(|e| ConfigError::Invalid {
    field,
    reason: format!("`{raw}` is not a number of seconds: {e}"),
  })
}

/// Parses `k=v,k=v`.
fn parse_options(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|pair| !pair.is_empty())
    .map(|pair| {
      pair
        .split_once('=')
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .ok_or_else(|| ConfigError::Invalid {
          field:  "extra_options",
          reason: format!("`{pair}` is not a key=value pair"),
        })
    })
    .collect()
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
  Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
}

fn name_or_id(name: Option<&String>, id: Option<&String>) -> Option<NameOrId> {
  name
    .map(|n| NameOrId::Name(n.clone()))
    .or_else(|| id.map(|i| NameOrId::Id(i.clone())))
}

impl SwiftConfig {
  /// Reads `SWIFT_*` environment variables on top of the defaults.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Like [`SwiftConfig::from_env`], reading variables through `lookup`.
  pub fn from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    let mut config = Self::default();
    let var = |name: &str| lookup(&format!("SWIFT_{name}"));

    config.auth_url = var("AUTH_URL");
    config.username = var("USERNAME");
    config.key = var("KEY");
    config.auth_version =
      var("AUTH_VERSION").map(|v| v.parse()).transpose()?;
    config.tenant_name = var("TENANT_NAME");
    config.tenant_id = var("TENANT_ID");
    config.user_domain_name = var("USER_DOMAIN_NAME");
    config.user_domain_id = var("USER_DOMAIN_ID");
    config.project_domain_name = var("PROJECT_DOMAIN_NAME");
    config.project_domain_id = var("PROJECT_DOMAIN_ID");
    config.region_name = var("REGION_NAME");
    config.container_name = var("CONTAINER_NAME");
    config.static_container_name = var("STATIC_CONTAINER_NAME");
    config.auto_create_container_allow_origin =
      var("AUTO_CREATE_CONTAINER_ALLOW_ORIGIN");
    config.base_url = var("BASE_URL");
    config.static_base_url = var("STATIC_BASE_URL");
    config.temp_url_key = var("TEMP_URL_KEY");

    let flags = [
      ("AUTO_CREATE_CONTAINER", "auto_create_container"),
      ("AUTO_CREATE_CONTAINER_PUBLIC", "auto_create_container_public"),
      ("AUTO_BASE_URL", "auto_base_url"),
      ("USE_TEMP_URLS", "use_temp_urls"),
      ("FULL_LISTING", "full_listing"),
      ("LAZY_CONNECT", "lazy_connect"),
    ];
    for (name, field) in flags {
      let Some(raw) = var(name) else { continue };
      let value = parse_bool(field, &raw)?;
      match field {
        "auto_create_container" => config.auto_create_container = value,
        "auto_create_container_public" => {
          config.auto_create_container_public = value;
        }
        "auto_base_url" => config.auto_base_url = value,
        "use_temp_urls" => config.use_temp_urls = value,
        "full_listing" => config.full_listing = value,
        _ => config.lazy_connect = value,
      }
    }

    if let Some(raw) = var("NAME_PREFIX") {
      config.name_prefix = raw;
    }
    if let Some(raw) = var("STATIC_NAME_PREFIX") {
      config.static_name_prefix = raw;
    }
    if let Some(raw) = var("TEMP_URL_DURATION") {
      config.temp_url_duration = parse_secs("temp_url_duration", &raw)?;
    }
    if let Some(raw) = var("TEMP_URL_DIGEST") {
      config.temp_url_digest = raw.parse().map_err(|reason| {
        ConfigError::Invalid {
          field: "temp_url_digest",
          reason,
        }
      })?;
    }
    if let Some(raw) = var("AUTH_TOKEN_DURATION") {
      config.auth_token_duration =
        Some(parse_secs("auth_token_duration", &raw)?);
    }
    if let Some(raw) = var("TIMEOUT") {
      config.timeout = parse_secs("timeout", &raw)?;
    }
    if let Some(raw) = var("EXTRA_OPTIONS") {
      config.extra_options = parse_options(&raw)?;
    }

    Ok(config)
  }

  /// Checks that the configuration can serve `role`.
  pub fn validate(&self, role: StorageRole) -> Result<(), ConfigError> {
    self.resolve(role).map(drop)
  }

  fn auth_request(&self) -> Result<AuthRequest, ConfigError> {
    let auth_url = self
      .auth_url
      .as_deref()
      .ok_or(ConfigError::Missing("auth_url"))?;
    let auth_url = parse_url("auth_url", auth_url)?;
    let username = self
      .username
      .clone()
      .ok_or(ConfigError::Missing("username"))?;
    let key = self.key.clone().ok_or(ConfigError::Missing("key"))?;

    let project = name_or_id(self.tenant_name.as_ref(), self.tenant_id.as_ref());
    let user_domain =
      name_or_id(self.user_domain_name.as_ref(), self.user_domain_id.as_ref());
    let project_domain = name_or_id(
      self.project_domain_name.as_ref(),
      self.project_domain_id.as_ref(),
    );

    let version = self.auth_version.unwrap_or_else(|| {
      AuthVersion::detect(
        project.is_some(),
        user_domain.is_some() || project_domain.is_some(),
      )
    });
    match version {
      AuthVersion::V1 => {}
      AuthVersion::V2 => {
        if project.is_none() {
          return Err(ConfigError::MissingTenant);
        }
      }
      AuthVersion::V3 => {
        if project.is_none() {
          return Err(ConfigError::MissingV3Scope("tenant_name"));
        }
        if user_domain.is_none() {
          return Err(ConfigError::MissingV3Scope("user_domain_name"));
        }
        if project_domain.is_none() {
          return Err(ConfigError::MissingV3Scope("project_domain_name"));
        }
      }
    }

    let mut endpoint_type = EndpointType::default();
    let mut service_type = DEFAULT_SERVICE_TYPE.to_owned();
    for (option, value) in &self.extra_options {
      match option.as_str() {
        "endpoint_type" => {
          endpoint_type = EndpointType::from_str(value).map_err(|reason| {
            ConfigError::Invalid {
              field: "extra_options",
              reason,
            }
          })?;
        }
        "service_type" => service_type.clone_from(value),
        other => warn!(option = other, "Ignoring unknown extra option"),
      }
    }

    Ok(AuthRequest {
      auth_url,
      version,
      username,
      key,
      project,
      user_domain,
      project_domain,
      region: self.region_name.clone(),
      endpoint_type,
      service_type,
    })
  }

  fn temp_urls(&self) -> Result<Option<TempUrlConfig>, ConfigError> {
    if !self.use_temp_urls {
      return Ok(None);
    }
    if self.temp_url_duration == 0 {
      return Err(ConfigError::Invalid {
        field:  "temp_url_duration",
        reason: "must be positive".to_owned(),
      });
    }
    let key = self.temp_url_key.as_deref().map(TempUrlKey::new).transpose()?;
    if key.is_none() {
      warn!("Temporary URLs are enabled without `temp_url_key`");
    }
    Ok(Some(TempUrlConfig {
      key,
      duration: Duration::from_secs(self.temp_url_duration),
      digest: self.temp_url_digest,
    }))
  }

  fn fallback_ttl(&self) -> Result<Option<Duration>, ConfigError> {
    let Some(secs) = self.auth_token_duration else {
      return Ok(None);
    };
    let ttl = Duration::from_secs(secs);
    if expiry_after(Utc::now(), ttl).is_none() {
      return Err(ConfigError::Invalid {
        field:  "auth_token_duration",
        reason: format!("{secs} seconds from now is out of range"),
      });
    }
    Ok(Some(ttl))
  }

  pub(crate) fn resolve(
    &self,
    role: StorageRole,
  ) -> Result<Settings, ConfigError> {
    let (container, base_url, name_prefix) = match role {
      StorageRole::Default => (
        ("container_name", self.container_name.as_ref()),
        ("base_url", self.base_url.as_deref()),
        &self.name_prefix,
      ),
      StorageRole::Static => (
        ("static_container_name", self.static_container_name.as_ref()),
        ("static_base_url", self.static_base_url.as_deref()),
        &self.static_name_prefix,
      ),
    };

    let auth = self.auth_request()?;
    let container = container
      .1
      .filter(|c| !c.is_empty())
      .cloned()
      .ok_or(ConfigError::Missing(container.0))?;

    let (base_field, base_url) = base_url;
    let base_url = base_url
      .map(|raw| parse_url(base_field, raw))
      .transpose()?;
    let url_base = match (self.auto_base_url, base_url) {
      (true, base_url) => UrlBase::Auto(base_url),
      (false, Some(root)) => UrlBase::Fixed(
        BaseUrlSpec::fixed(&root).map_err(|source| ConfigError::BaseUrl {
          field: base_field,
          source,
        })?,
      ),
      (false, None) => return Err(ConfigError::MissingBaseUrl(base_field)),
    };

    // static assets are public and never signed
    let temp_urls = self.temp_urls()?;
    let (temp_urls, public_on_create) = match role {
      StorageRole::Default => (temp_urls, self.auto_create_container_public),
      StorageRole::Static => (None, true),
    };

    Ok(Settings {
      auth,
      fallback_ttl: self.fallback_ttl()?,
      container,
      auto_create: self.auto_create_container,
      public_on_create,
      allow_origin: self.auto_create_container_allow_origin.clone(),
      url_base,
      name_prefix: name_prefix.clone(),
      temp_urls,
      full_listing: self.full_listing,
      lazy_connect: self.lazy_connect,
      timeout: Duration::from_secs(self.timeout),
    })
  }
}
