//! Token requests against TempAuth (v1) and Keystone (v2, v3).

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, header::HeaderMap};
use serde::Deserialize;
use serde_json::{Value, json};
use swift_core::{
  AuthRequest, AuthSession, AuthVersion, ClientError, ClientResult,
  auth::NameOrId,
};
use tracing::{debug, error, instrument};
use url::Url;

use crate::errors::{error_for_status, reqwest_error_to_client_error};

#[derive(Debug, Deserialize)]
struct V2Response {
  access: V2Access,
}

#[derive(Debug, Deserialize)]
struct V2Access {
  token:           V2Token,
  #[serde(rename = "serviceCatalog", default)]
  service_catalog: Vec<CatalogService<serde_json::Map<String, Value>>>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
  id:      String,
  expires: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V3Response {
  token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
  expires_at: Option<String>,
  #[serde(default)]
  catalog:    Vec<CatalogService<V3Endpoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "E: Deserialize<'de>"))]
struct CatalogService<E> {
  #[serde(rename = "type")]
  kind:      String,
  #[serde(default)]
  endpoints: Vec<E>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
  interface: String,
  url:       String,
  region:    Option<String>,
  region_id: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_expiry(raw: Option<&str>) -> ClientResult<Option<DateTime<Utc>>> {
  raw
    .map(|raw| {
      DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
          ClientError::Protocol(miette::miette!(
            "token expiry `{raw}` is not RFC 3339: {e}"
          ))
        })
    })
    .transpose()
}

fn expiry_in_seconds(
  raw: &str,
  now: DateTime<Utc>,
) -> ClientResult<DateTime<Utc>> {
  raw
    .trim()
    .parse::<i64>()
    .ok()
    .and_then(TimeDelta::try_seconds)
    .and_then(|remaining| now.checked_add_signed(remaining))
    .ok_or_else(|| {
      ClientError::Protocol(miette::miette!(
        "token lifetime `{raw}` is not a usable number of seconds"
      ))
    })
}

fn parse_storage_url(raw: &str) -> ClientResult<Url> {
  Url::parse(raw).map_err(|e| {
    ClientError::Protocol(miette::miette!(
      "storage URL `{raw}` is not valid: {e}"
    ))
  })
}

fn endpoint_url(auth_url: &Url, suffix: &str) -> String {
  format!("{}/{suffix}", auth_url.as_str().trim_end_matches('/'))
}

fn name_or_id(value: &NameOrId) -> Value {
  match value {
    NameOrId::Name(name) => json!({ "name": name }),
    NameOrId::Id(id) => json!({ "id": id }),
  }
}

pub(crate) fn v2_body(request: &AuthRequest) -> Value {
  let mut auth = json!({
    "passwordCredentials": {
      "username": request.username,
      "password": request.key,
    }
  });
  match &request.project {
    Some(NameOrId::Name(name)) => auth["tenantName"] = json!(name),
    Some(NameOrId::Id(id)) => auth["tenantId"] = json!(id),
    None => {}
  }
  json!({ "auth": auth })
}

pub(crate) fn v3_body(request: &AuthRequest) -> Value {
  let mut user = json!({
    "name": request.username,
    "password": request.key,
  });
  if let Some(domain) = &request.user_domain {
    user["domain"] = name_or_id(domain);
  }

  let mut auth = json!({
    "identity": {
      "methods": ["password"],
      "password": { "user": user },
    }
  });

  if let Some(project) = &request.project {
    let mut scope = name_or_id(project);
    // ids are globally unique, names need their domain
    if let (NameOrId::Name(_), Some(domain)) = (project, &request.project_domain)
    {
      scope["domain"] = name_or_id(domain);
    }
    auth["scope"] = json!({ "project": scope });
  }

  json!({ "auth": auth })
}

fn region_matches(wanted: Option<&str>, candidates: &[Option<&str>]) -> bool {
  wanted.is_none_or(|wanted| candidates.iter().any(|c| *c == Some(wanted)))
}

fn select_v2_endpoint(
  access: &V2Access,
  request: &AuthRequest,
) -> ClientResult<(Url, Option<String>)> {
  let field = request.endpoint_type.v2_field();
  access
    .service_catalog
    .iter()
    .filter(|service| service.kind == request.service_type)
    .flat_map(|service| service.endpoints.iter())
    .find_map(|endpoint| {
      let region = endpoint.get("region").and_then(Value::as_str);
      if !region_matches(request.region.as_deref(), &[region]) {
        return None;
      }
      let url = endpoint.get(field).and_then(Value::as_str)?;
      Some((url, region.map(ToOwned::to_owned)))
    })
    .ok_or_else(|| no_endpoint(request))
    .and_then(|(url, region)| Ok((parse_storage_url(url)?, region)))
}

fn select_v3_endpoint(
  token: &V3Token,
  request: &AuthRequest,
) -> ClientResult<(Url, Option<String>)> {
  let interface = request.endpoint_type.interface();
  token
    .catalog
    .iter()
    .filter(|service| service.kind == request.service_type)
    .flat_map(|service| service.endpoints.iter())
    .find(|endpoint| {
      endpoint.interface == interface
        && region_matches(request.region.as_deref(), &[
          endpoint.region.as_deref(),
          endpoint.region_id.as_deref(),
        ])
    })
    .ok_or_else(|| no_endpoint(request))
    .and_then(|endpoint| {
      let region =
        endpoint.region.clone().or_else(|| endpoint.region_id.clone());
      Ok((parse_storage_url(&endpoint.url)?, region))
    })
}

fn no_endpoint(request: &AuthRequest) -> ClientError {
  ClientError::Protocol(miette::miette!(
    "no `{}` endpoint of type `{}` in region {:?} in the service catalog",
    request.endpoint_type.interface(),
    request.service_type,
    request.region,
  ))
}

#[instrument(
  skip(client, request),
  fields(auth_url = %request.auth_url, version = %request.version),
  err
)]
pub(crate) async fn authenticate(
  client: &Client,
  request: &AuthRequest,
) -> ClientResult<AuthSession> {
  match request.version {
    AuthVersion::V1 => authenticate_v1(client, request).await,
    AuthVersion::V2 => authenticate_v2(client, request).await,
    AuthVersion::V3 => authenticate_v3(client, request).await,
  }
}

async fn authenticate_v1(
  client: &Client,
  request: &AuthRequest,
) -> ClientResult<AuthSession> {
  debug!("Requesting v1 token");

  let resp = client
    .get(request.auth_url.clone())
    .header("X-Auth-User", &request.username)
    .header("X-Auth-Key", &request.key)
    .send()
    .await
    .map_err(reqwest_error_to_client_error)?;
  let resp = error_for_status(resp, "auth endpoint").await?;
  let headers = resp.headers();

  let token = header_str(headers, "x-auth-token")
    .or_else(|| header_str(headers, "x-storage-token"))
    .ok_or_else(|| {
      error!("v1 auth response carried no token");
      ClientError::Protocol(miette::miette!("auth response has no X-Auth-Token"))
    })?;
  let storage_url = header_str(headers, "x-storage-url").ok_or_else(|| {
    error!("v1 auth response carried no storage URL");
    ClientError::Protocol(miette::miette!("auth response has no X-Storage-Url"))
  })?;

  // seconds remaining, when the proxy reports it
  let expires_at = header_str(headers, "x-auth-token-expires")
    .map(|raw| expiry_in_seconds(raw, Utc::now()))
    .transpose()?;

  Ok(
    AuthSession::new(token.to_owned(), parse_storage_url(storage_url)?)
      .with_expiry(expires_at),
  )
}

async fn authenticate_v2(
  client: &Client,
  request: &AuthRequest,
) -> ClientResult<AuthSession> {
  debug!("Requesting v2 token");

  let resp = client
    .post(endpoint_url(&request.auth_url, "tokens"))
    .json(&v2_body(request))
    .send()
    .await
    .map_err(reqwest_error_to_client_error)?;
  let resp = error_for_status(resp, "auth endpoint").await?;
  let body: V2Response =
    resp.json().await.map_err(reqwest_error_to_client_error)?;

  let (storage_url, region) = select_v2_endpoint(&body.access, request)?;
  let expires_at = parse_expiry(body.access.token.expires.as_deref())?;

  Ok(
    AuthSession::new(body.access.token.id, storage_url)
      .with_expiry(expires_at)
      .with_region(region),
  )
}

async fn authenticate_v3(
  client: &Client,
  request: &AuthRequest,
) -> ClientResult<AuthSession> {
  debug!("Requesting v3 token");

  let resp = client
    .post(endpoint_url(&request.auth_url, "auth/tokens"))
    .json(&v3_body(request))
    .send()
    .await
    .map_err(reqwest_error_to_client_error)?;
  let resp = error_for_status(resp, "auth endpoint").await?;

  let token = header_str(resp.headers(), "x-subject-token")
    .map(ToOwned::to_owned)
    .ok_or_else(|| {
      error!("v3 auth response carried no subject token");
      ClientError::Protocol(miette::miette!(
        "auth response has no X-Subject-Token"
      ))
    })?;
  let body: V3Response =
    resp.json().await.map_err(reqwest_error_to_client_error)?;

  let (storage_url, region) = select_v3_endpoint(&body.token, request)?;
  let expires_at = parse_expiry(body.token.expires_at.as_deref())?;

  Ok(
    AuthSession::new(token, storage_url)
      .with_expiry(expires_at)
      .with_region(region),
  )
}
