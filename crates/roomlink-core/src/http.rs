//! Ad-hoc HTTP passthrough for hosts without their own HTTP stack.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::errors::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Perform one HTTP request and parse the response as JSON.
///
/// A single attempt whose outcome is reported exactly once through the
/// returned future; callers that outlive their session simply discard the
/// completion. The body is attached for POST and PUT only, matching the
/// passthrough contract. Status >= 400 is [`ApiError::Http`], never a
/// parsed success.
pub async fn request(
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    body: Option<&str>,
) -> Result<Value, ApiError> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ApiError::InvalidRequest(format!("invalid http method `{method}`")))?;
    url::Url::parse(url).map_err(|e| ApiError::InvalidRequest(format!("invalid url `{url}`: {e}")))?;

    tracing::debug!("passthrough {method} {url}");

    let mut req = reqwest::Client::new().request(method.clone(), url).timeout(REQUEST_TIMEOUT);
    for (k, v) in headers {
        req = req.header(k, v);
    }
    if let Some(body) = body {
        if method == Method::POST || method == Method::PUT {
            req = req.body(body.to_string());
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if status.as_u16() >= 400 {
        return Err(ApiError::Http { status: status.as_u16(), body: text });
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_method() {
        match request("NOT A METHOD", "http://example.com", &HashMap::new(), None).await {
            Err(ApiError::InvalidRequest(msg)) => assert!(msg.contains("method")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_invalid_url() {
        match request("GET", "not a url", &HashMap::new(), None).await {
            Err(ApiError::InvalidRequest(msg)) => assert!(msg.contains("url")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_network_error() {
        match request("GET", "http://127.0.0.1:1/x", &HashMap::new(), None).await {
            Err(ApiError::Network(_)) => {}
            other => panic!("expected Network error, got {other:?}"),
        }
    }
}
