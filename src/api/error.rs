use std::path::PathBuf;

use reqwest::header::InvalidHeaderValue;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while talking to the admin API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{status}: failed to refresh auth")]
    RefreshFailed { status: StatusCode },

    #[error("{status}: {action}: {message}")]
    Status {
        status: StatusCode,
        action: &'static str,
        message: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to access {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("asset '{0}' has no download URL")]
    MissingUrl(String),

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Turn an unexpected response into an [`ApiError::Status`], preferring the
/// server's `{"error": ...}` message and falling back to the status text.
pub(crate) async fn status_error(res: Response, action: &'static str) -> ApiError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.error.is_empty() => parsed.error,
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
        _ => body,
    };

    ApiError::Status {
        status,
        action,
        message,
    }
}

/// Pass the response through when it carries `expected`, otherwise convert it
/// into an error.
pub(crate) async fn expect_status(
    res: Response,
    expected: StatusCode,
    action: &'static str,
) -> Result<Response, ApiError> {
    if res.status() == expected {
        Ok(res)
    } else {
        Err(status_error(res, action).await)
    }
}

pub(crate) async fn decode<T: serde::de::DeserializeOwned>(res: Response) -> Result<T, ApiError> {
    let body = res.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
