//! Shared HTTP plumbing: client construction and status-code mapping.

use ragdesk_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Build a client with the configured request timeout.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))
}

/// Translate a transport failure, keeping timeouts distinguishable.
pub(crate) fn transport(e: reqwest::Error) -> ProviderError {
    ProviderError::from_transport(e.to_string(), e.is_timeout())
}

/// A 200 response whose body does not have the expected shape.
pub(crate) fn malformed(what: impl std::fmt::Display) -> ProviderError {
    ProviderError::ApiError {
        status_code: 200,
        message: format!("Malformed response: {what}"),
    }
}

/// Decode a JSON body, naming `what` in the error.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| malformed(format_args!("{what}: {e}")))
}

/// Map a non-success response to the matching `ProviderError`.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 200 {
        return Ok(response);
    }

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    let error_body = response.text().await.unwrap_or_default();

    if status == 404 {
        return Err(ProviderError::ModelNotFound(error_body));
    }

    warn!(provider, status, body = %error_body, "Provider returned error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}
