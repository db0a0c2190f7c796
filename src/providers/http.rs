//! Shared HTTP plumbing for the remote providers.

use crate::error::{Result, SpeechError};
use std::time::Duration;

/// Build the client every provider request goes through.
///
/// # Errors
///
/// Returns [`SpeechError::Http`] if the TLS backend cannot be initialised.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("polyvox/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SpeechError::Http(format!("failed to build HTTP client: {e}")))
}

/// Describe a non-success response as `HTTP {status}: {message}`.
///
/// Consumes the response body.
pub(crate) async fn failure_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("HTTP {}: {}", status.as_u16(), extract_error_message(&body))
}

/// Pull a human-readable message out of a provider error body.
///
/// Understands `{"error": {"message": ..}}`, `{"detail": {"message": ..}}`
/// and `{"detail": ".."}`. Anything else is returned as-is, trimmed.
pub fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_owned();
    };
    let nested = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
    };
    nested("error")
        .or_else(|| nested("detail"))
        .or_else(|| value.get("detail").and_then(|d| d.as_str()))
        .map(str::to_owned)
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Parse a response body as JSON.
///
/// # Errors
///
/// [`SpeechError::MalformedResponse`] if the body is not JSON.
pub(crate) async fn json_body(
    response: reqwest::Response,
    what: &str,
) -> Result<serde_json::Value> {
    let text = response
        .text()
        .await
        .map_err(|e| SpeechError::MalformedResponse(format!("{what}: unreadable body: {e}")))?;
    serde_json::from_str(&text)
        .map_err(|e| SpeechError::MalformedResponse(format!("{what}: {e}")))
}
