//! Shared plumbing for ArcGIS REST endpoints

use crate::RemoteError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// User agent string for service requests
const USER_AGENT_VALUE: &str = concat!("isochrone-lib/", env!("CARGO_PKG_VERSION"));

/// HTTP client with the configured request timeout
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT_VALUE)
        .build()
        .map_err(|e| RemoteError::transport(format!("failed to create HTTP client: {e}")))
}

/// Append `token` to the request parameters when a key is configured
pub(crate) fn with_token(mut params: Vec<(&'static str, String)>, api_key: Option<&str>) -> Vec<(&'static str, String)> {
    if let Some(key) = api_key {
        params.push(("token", key.to_string()));
    }
    params
}

/// Decode a REST response body
///
/// ArcGIS services report failures as `{"error": {...}}`, frequently with an
/// HTTP 200 status, so the body is inspected before decoding into `T`.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RemoteError::transport(e.to_string()))?;

    if !status.is_success() {
        return Err(RemoteError {
            code: Some(i64::from(status.as_u16())),
            message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
            details: vec![body],
        });
    }

    parse_body(&body)
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RemoteError::transport(format!("malformed response: {e}")))?;

    if let Some(error) = value.get("error") {
        return Err(serde_json::from_value(error.clone())
            .unwrap_or_else(|_| RemoteError::transport(error.to_string())));
    }

    serde_json::from_value(value).map_err(|e| RemoteError::transport(format!("unexpected response: {e}")))
}

/// Map a transport failure into a remote error payload
pub(crate) fn transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::transport(format!("request timed out: {err}"))
    } else {
        RemoteError::transport(err.to_string())
    }
}
