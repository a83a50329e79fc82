//! Shared HTTP plumbing for registry metadata fetchers.

use std::error::Error as StdError;
use std::time::Duration;

use rbridge_core::FetchError;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

pub const USER_AGENT: &str = concat!("rbridge/", env!("CARGO_PKG_VERSION"));

/// Builds a client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Client {
    build_authorized_client(timeout, None)
}

/// Same as [`build_client`], sending `Authorization: Bearer <token>` when a token is given.
pub fn build_authorized_client(timeout: Duration, bearer_token: Option<&str>) -> Client {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token.map(str::trim).filter(|token| !token.is_empty()) {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(err) => tracing::warn!("ignoring malformed registry token: {err}"),
        }
    }

    match Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!("falling back to default http client: {err}");
            Client::new()
        }
    }
}

/// Issues a GET and decodes the JSON body.
///
/// A `404` is reported as `Ok(None)` so callers can decide whether a missing
/// resource is fatal.
///
/// # Errors
///
/// Returns [`FetchError::Transport`] for network failures and non-success
/// statuses, and [`FetchError::InvalidResponse`] when the body is not valid JSON.
pub async fn get_json<T: DeserializeOwned>(
    http: &Client,
    url: &str,
    context: &str,
) -> Result<Option<T>, FetchError> {
    tracing::debug!(url, "registry request");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| reqwest_transport_error(context, url, err))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    if !response.status().is_success() {
        return Err(FetchError::Transport {
            message: format!("{context}: returned status {}", response.status()),
        });
    }

    response
        .json::<T>()
        .await
        .map(Some)
        .map_err(|err| FetchError::InvalidResponse {
            message: format!("{context}: failed to parse response JSON: {err}"),
        })
}

/// Like [`get_json`] but returns the raw body text.
///
/// # Errors
///
/// Returns [`FetchError::Transport`] for network failures and non-success statuses.
pub async fn get_text(http: &Client, url: &str, context: &str) -> Result<Option<String>, FetchError> {
    tracing::debug!(url, "registry request");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| reqwest_transport_error(context, url, err))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    if !response.status().is_success() {
        return Err(FetchError::Transport {
            message: format!("{context}: returned status {}", response.status()),
        });
    }

    response
        .text()
        .await
        .map(Some)
        .map_err(|err| reqwest_transport_error(context, url, err))
}

pub fn reqwest_transport_error(context: &str, request_url: &str, error: reqwest::Error) -> FetchError {
    let mut details = Vec::new();

    let effective_url = error
        .url()
        .map(|url| url.as_str().to_string())
        .unwrap_or_else(|| request_url.to_string());
    details.push(format!("request_url={effective_url}"));

    let mut kinds = Vec::new();
    if error.is_timeout() {
        kinds.push("timeout");
    }
    if error.is_connect() {
        kinds.push("connect");
    }
    if error.is_request() {
        kinds.push("request");
    }
    if error.is_body() {
        kinds.push("body");
    }
    if error.is_decode() {
        kinds.push("decode");
    }
    if let Some(status) = error.status() {
        kinds.push(if status.is_client_error() {
            "http4xx"
        } else if status.is_server_error() {
            "http5xx"
        } else {
            "http"
        });
        details.push(format!("http_status={status}"));
    }
    if kinds.is_empty() {
        kinds.push("unknown");
    }
    details.push(format!("kinds={}", kinds.join(",")));

    let mut sources = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        sources.push(source.to_string());
        if sources.len() >= 6 {
            break;
        }
        current = source.source();
    }
    if !sources.is_empty() {
        details.push(format!("source_chain={}", sources.join(" | ")));
    }

    details.push(
        "hint=if a corporate proxy is required, set HTTPS_PROXY/HTTP_PROXY/NO_PROXY".to_string(),
    );

    FetchError::Transport {
        message: format!("{context}: {error}; {}", details.join("; ")),
    }
}
