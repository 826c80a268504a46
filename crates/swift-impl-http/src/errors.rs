use miette::Report;
use reqwest::{Response, StatusCode};
use swift_core::ClientError;

pub(crate) fn reqwest_error_to_client_error(err: reqwest::Error) -> ClientError {
  match err {
    // timed out waiting for connect or response
    e if e.is_timeout() => ClientError::Timeout(Report::from_err(e)),

    // couldn't reach the host at all
    e if e.is_connect() => ClientError::Connection(Report::from_err(e)),

    // request could not be built, usually a bad URL
    e if e.is_builder() => ClientError::InvalidConfig(Report::from_err(e)),

    // response body didn't decode
    e if e.is_decode() => ClientError::Protocol(Report::from_err(e)),

    // body streaming failed midway
    e if e.is_body() => ClientError::Stream(Report::from_err(e)),

    // wildcard
    e => ClientError::Connection(
      Report::from_err(e).context("wildcard variant"),
    ),
  }
}

/// Passes successful responses through and maps the rest onto
/// [`ClientError`], keeping the response body as context.
pub(crate) async fn error_for_status(
  resp: Response,
  target: &str,
) -> Result<Response, ClientError> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }

  let body = resp.text().await.unwrap_or_default();
  let report = miette::miette!("{target} answered {status}: {body}");

  Err(match status {
    StatusCode::UNAUTHORIZED => ClientError::Unauthorized(report),
    StatusCode::FORBIDDEN => ClientError::Forbidden(report),
    StatusCode::NOT_FOUND => ClientError::NotFound(target.to_owned()),
    s if s.is_server_error() => ClientError::Server {
      status: s.as_u16(),
      report,
    },
    s => ClientError::UnexpectedStatus {
      status: s.as_u16(),
      report,
    },
  })
}
