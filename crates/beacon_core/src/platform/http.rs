//! HTTP plumbing shared by the platform adapters

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::Platform;
use crate::{CoreError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends adapter requests and maps failures onto the error taxonomy
#[derive(Debug, Clone)]
pub struct PlatformHttp {
    platform: Platform,
    client: reqwest::Client,
}

impl PlatformHttp {
    pub fn new(platform: Platform, client: reqwest::Client) -> Self {
        Self { platform, client }
    }

    /// Shared client with the adapter request timeout
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default()
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            let details = if e.is_timeout() {
                format!("request timed out: {}", e)
            } else {
                e.to_string()
            };
            CoreError::transient(self.platform.as_str(), operation, details)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.platform, operation, status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            CoreError::transient(
                self.platform.as_str(),
                operation,
                format!("unexpected response body: {}", e),
            )
        })
    }
}

/// 401/403 and token-invalid payloads mean the credential is bad; anything
/// else is unrelated to the credential.
pub fn classify_status(
    platform: Platform,
    operation: &str,
    status: StatusCode,
    body: &str,
) -> CoreError {
    let details = format!("HTTP {}: {}", status, truncate(body, 300));

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CoreError::auth_failure(platform, details);
    }

    if is_invalid_token_payload(body) {
        return CoreError::auth_failure(platform, details);
    }

    CoreError::transient(platform.as_str(), operation, details)
}

/// Graph API reports a dead token as 400 with error code 190
fn is_invalid_token_payload(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/code").and_then(Value::as_i64))
        .is_some_and(|code| code == 190)
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Platforms encode counters as JSON strings or numbers
pub fn as_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0).round() as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f.max(0.0).round() as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

pub fn as_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}
