//! An implementation of the Swift client interface over HTTP.

mod auth;
mod errors;
mod listing;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{
  Client, Response,
  header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED},
};
use swift_core::{
  AuthRequest, AuthSession, ClientError, ClientResult, ContainerMetadata,
  ContainerOptions, ListEntry, ListQuery, ObjectMetadata, ObjectName,
  RequestStream, ResponseStream, SwiftClientLike, UploadOptions,
};
use swift_url::{encode_object_name, encode_segment};
use tracing::{debug, error, info, instrument};

use self::{
  errors::{error_for_status, reqwest_error_to_client_error},
  listing::RawEntry,
};

const AUTH_TOKEN: &str = "X-Auth-Token";

/// [`SwiftClientLike`] implementer that talks to a real cluster.
#[derive(Debug, Clone)]
pub struct SwiftClientHttp {
  client: Client,
}

impl SwiftClientHttp {
  /// Creates a new [`SwiftClientHttp`] whose requests give up after
  /// `timeout`.
  #[instrument]
  pub fn new(timeout: Duration) -> ClientResult<Self> {
    debug!("Initializing Swift HTTP client");

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(reqwest_error_to_client_error)?;

    info!("Swift HTTP client initialized successfully");
    Ok(Self { client })
  }
}

fn container_url(session: &AuthSession, container: &str) -> String {
  format!(
    "{}/{}",
    session.storage_url().as_str().trim_end_matches('/'),
    encode_segment(container)
  )
}

fn object_url(
  session: &AuthSession,
  container: &str,
  name: &ObjectName,
) -> String {
  format!(
    "{}/{}",
    container_url(session, container),
    encode_object_name(name.as_str())
  )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
  header_str(headers, name).and_then(|v| v.parse().ok())
}

fn object_metadata(headers: &HeaderMap) -> ClientResult<ObjectMetadata> {
  let size = header_u64(headers, CONTENT_LENGTH.as_str()).ok_or_else(|| {
    error!("object response missing content-length");
    ClientError::Protocol(miette::miette!(
      "object response did not include content-length"
    ))
  })?;

  Ok(ObjectMetadata {
    size,
    etag: header_str(headers, ETAG.as_str())
      .map(|etag| etag.trim_matches('"').to_owned()),
    content_type: header_str(headers, CONTENT_TYPE.as_str())
      .map(ToOwned::to_owned),
    last_modified: header_str(headers, LAST_MODIFIED.as_str())
      .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
      .map(|dt| dt.with_timezone(&Utc)),
  })
}

impl SwiftClientHttp {
  async fn send(
    &self,
    req: reqwest::RequestBuilder,
    target: &str,
  ) -> ClientResult<Response> {
    let resp = req.send().await.map_err(|e| {
      error!(error = ?e, "Request failed to complete");
      reqwest_error_to_client_error(e)
    })?;
    error_for_status(resp, target).await
  }

  async fn list_page(
    &self,
    session: &AuthSession,
    container: &str,
    query: &ListQuery,
    marker: Option<&str>,
  ) -> ClientResult<Vec<RawEntry>> {
    let mut params = vec![("format", "json".to_owned())];
    if let Some(prefix) = &query.prefix {
      params.push(("prefix", prefix.clone()));
    }
    if let Some(delimiter) = query.delimiter {
      params.push(("delimiter", delimiter.to_string()));
    }
    if let Some(marker) = marker {
      params.push(("marker", marker.to_owned()));
    }

    let req = self
      .client
      .get(container_url(session, container))
      .header(AUTH_TOKEN, session.token())
      .query(&params);
    let resp = self.send(req, container).await?;

    // an empty container answers 204 without a body
    if resp.status() == reqwest::StatusCode::NO_CONTENT {
      return Ok(Vec::new());
    }
    resp.json().await.map_err(reqwest_error_to_client_error)
  }
}

#[async_trait::async_trait]
impl SwiftClientLike for SwiftClientHttp {
  async fn authenticate(
    &self,
    request: &AuthRequest,
  ) -> ClientResult<AuthSession> {
    auth::authenticate(&self.client, request).await
  }

  #[instrument(skip(self, session), err)]
  async fn head_container(
    &self,
    session: &AuthSession,
    container: &str,
  ) -> ClientResult<ContainerMetadata> {
    debug!("Fetching container metadata");

    let req = self
      .client
      .head(container_url(session, container))
      .header(AUTH_TOKEN, session.token());
    let resp = self.send(req, container).await?;
    let headers = resp.headers();

    Ok(ContainerMetadata {
      object_count: header_u64(headers, "x-container-object-count")
        .unwrap_or_default(),
      bytes_used:   header_u64(headers, "x-container-bytes-used")
        .unwrap_or_default(),
      read_acl:     header_str(headers, "x-container-read")
        .map(ToOwned::to_owned),
    })
  }

  #[instrument(skip(self, session), err)]
  async fn put_container(
    &self,
    session: &AuthSession,
    container: &str,
    options: &ContainerOptions,
  ) -> ClientResult<()> {
    debug!("Creating container");

    let mut req = self
      .client
      .put(container_url(session, container))
      .header(AUTH_TOKEN, session.token())
      .header(CONTENT_LENGTH, 0);
    if let Some(acl) = &options.read_acl {
      req = req.header("X-Container-Read", acl);
    }
    if let Some(origin) = &options.allow_origin {
      req = req.header("X-Container-Meta-Access-Control-Allow-Origin", origin);
    }
    self.send(req, container).await?;

    info!("Container created");
    Ok(())
  }

  #[instrument(
    skip(self, session, data),
    fields(
      name = %name,
      content_type = ?options.content_type,
      content_length = ?options.content_length,
    ),
    err
  )]
  async fn put_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
    data: RequestStream,
    options: UploadOptions,
  ) -> ClientResult<()> {
    debug!("Starting stream upload");

    let mut req = self
      .client
      .put(object_url(session, container, name))
      .header(AUTH_TOKEN, session.token());
    if let Some(content_type) = &options.content_type {
      req = req.header(CONTENT_TYPE, content_type);
    }
    // without a length reqwest sends the body chunked
    if let Some(length) = options.content_length {
      req = req.header(CONTENT_LENGTH, length);
    }
    let req = req.body(reqwest::Body::wrap_stream(data));

    self.send(req, &format!("{container}/{name}")).await?;

    info!("Stream uploaded successfully");
    Ok(())
  }

  #[instrument(skip(self, session), fields(name = %name), err)]
  async fn get_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<(ObjectMetadata, ResponseStream)> {
    debug!("Retrieving object stream");

    let req = self
      .client
      .get(object_url(session, container, name))
      .header(AUTH_TOKEN, session.token());
    let resp = self.send(req, &format!("{container}/{name}")).await?;

    let metadata = object_metadata(resp.headers())?;
    let stream: ResponseStream =
      Box::pin(resp.bytes_stream().map_err(reqwest_error_to_client_error));

    info!(size = metadata.size, "Object stream retrieved successfully");
    Ok((metadata, stream))
  }

  #[instrument(skip(self, session), fields(name = %name), err)]
  async fn head_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<ObjectMetadata> {
    debug!("Fetching object metadata");

    let req = self
      .client
      .head(object_url(session, container, name))
      .header(AUTH_TOKEN, session.token());
    let resp = self.send(req, &format!("{container}/{name}")).await?;

    object_metadata(resp.headers())
  }

  #[instrument(skip(self, session), fields(name = %name), err)]
  async fn delete_object(
    &self,
    session: &AuthSession,
    container: &str,
    name: &ObjectName,
  ) -> ClientResult<()> {
    debug!("Deleting object");

    let req = self
      .client
      .delete(object_url(session, container, name))
      .header(AUTH_TOKEN, session.token());
    self.send(req, &format!("{container}/{name}")).await?;

    info!("Object deleted successfully");
    Ok(())
  }

  #[instrument(skip(self, session), err)]
  async fn list_objects(
    &self,
    session: &AuthSession,
    container: &str,
    query: &ListQuery,
  ) -> ClientResult<Vec<ListEntry>> {
    let mut entries = Vec::new();
    let mut marker: Option<String> = None;

    loop {
      let page = self
        .list_page(session, container, query, marker.as_deref())
        .await?;
      debug!(page_len = page.len(), "Received listing page");

      let Some(last) = page.last() else { break };
      marker = Some(last.marker().to_owned());
      entries.extend(page.into_iter().map(ListEntry::from));

      if !query.full_listing {
        break;
      }
    }

    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use reqwest::header::HeaderValue;
  use url::Url;

  use super::*;

  fn session() -> AuthSession {
    AuthSession::new(
      "tok".into(),
      Url::parse("http://10.0.2.2:8080/v1/AUTH_012345abcd/").unwrap(),
    )
  }

  #[test]
  fn test_object_url_encoding() {
    let session = session();
    assert_eq!(
      container_url(&session, "my container"),
      "http://10.0.2.2:8080/v1/AUTH_012345abcd/my%20container"
    );
    assert_eq!(
      object_url(&session, "django", &ObjectName::new("img/a b?.png")),
      "http://10.0.2.2:8080/v1/AUTH_012345abcd/django/img/a%20b%3F.png"
    );
  }

  #[test]
  fn test_object_metadata_from_headers() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
    headers.insert(
      ETAG,
      HeaderValue::from_static("\"5eb63bbbe01eeed093cb22bb8f5acdc3\""),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(
      LAST_MODIFIED,
      HeaderValue::from_static("Mon, 04 Apr 2016 14:49:21 GMT"),
    );

    let metadata = object_metadata(&headers).unwrap();
    assert_eq!(metadata.size, 11);
    assert_eq!(
      metadata.etag.as_deref(),
      Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );
    assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));
    assert_eq!(metadata.last_modified.unwrap().timestamp(), 1_459_781_361);
  }

  #[test]
  fn test_object_metadata_requires_length() {
    assert!(matches!(
      object_metadata(&HeaderMap::new()),
      Err(ClientError::Protocol(_))
    ));
  }
}
