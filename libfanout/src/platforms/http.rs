//! Shared HTTP plumbing for the platform adapters
//!
//! Status mapping used by every adapter:
//!
//! | Status             | Meaning                                  |
//! |--------------------|------------------------------------------|
//! | 2xx                | success                                  |
//! | 401, 403           | authentication rejected (business error) |
//! | 400, 422, other 4xx| validation rejected (business error)     |
//! | 429                | rate limited (transient)                 |
//! | 5xx, transport     | network (transient)                      |

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{PlatformError, Result};

/// Longest error text kept from an unparseable response body
const MAX_ERROR_TEXT: usize = 300;

/// Build the client shared by all adapters
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fanout/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(PlatformError::from)?;
    Ok(client)
}

/// Why a platform call did not succeed
#[derive(Debug, Clone)]
pub enum ApiError {
    /// The platform refused the request; final for this attempt
    Rejected {
        status: u16,
        message: String,
        code: Option<i64>,
        subcode: Option<i64>,
        body: String,
    },
    /// Rate limiting, server trouble or transport failure
    Transient(PlatformError),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Rejected { status: 401 | 403, .. })
    }

    /// Convert into the adapter error type; rejections become the matching
    /// non-transient variant
    pub fn into_platform_error(self) -> PlatformError {
        match self {
            ApiError::Transient(e) => e,
            rejected @ ApiError::Rejected { .. } if rejected.is_auth() => {
                PlatformError::Authentication(rejected.to_string())
            }
            rejected => PlatformError::Validation(rejected.to_string()),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Rejected {
                status: status @ (401 | 403),
                message,
                ..
            } => write!(f, "authentication failed (HTTP {}): {}", status, message),
            ApiError::Rejected {
                status, message, ..
            } => write!(f, "rejected (HTTP {}): {}", status, message),
            ApiError::Transient(e) => write!(f, "{}", e),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transient(e.into())
    }
}

/// Map a non-success response to an [`ApiError`]
pub fn classify(status: StatusCode, body: &str) -> ApiError {
    let (message, code, subcode) = extract_error(body);
    match status.as_u16() {
        429 => ApiError::Transient(PlatformError::RateLimit(message)),
        s if s >= 500 => ApiError::Transient(PlatformError::Network(format!(
            "HTTP {}: {}",
            s, message
        ))),
        s => ApiError::Rejected {
            status: s,
            message,
            code,
            subcode,
            body: body.to_string(),
        },
    }
}

/// Pull a readable message and numeric codes out of an error body.
///
/// Understands Graph (`{"error":{"message","code","error_subcode"}}`),
/// Twitter (`{"detail"}`, `{"errors":[{"message"}]}`), LinkedIn
/// (`{"message"}`) and TikTok (`{"error":{"code":"..","message"}}`).
fn extract_error(body: &str) -> (String, Option<i64>, Option<i64>) {
    let fallback = || body.chars().take(MAX_ERROR_TEXT).collect::<String>();
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return (fallback(), None, None),
    };

    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(fallback);
        let code = error.get("code").and_then(|c| c.as_i64());
        let subcode = error.get("error_subcode").and_then(|c| c.as_i64());
        let message = match error.get("code").and_then(|c| c.as_str()) {
            Some(text_code) => format!("{}: {}", text_code, message),
            None => message,
        };
        return (message, code, subcode);
    }

    if let Some(first) = value
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
    {
        let message = first
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(fallback);
        return (message, first.get("code").and_then(|c| c.as_i64()), None);
    }

    for field in ["detail", "message", "title"] {
        if let Some(message) = value.get(field).and_then(|m| m.as_str()) {
            return (message.to_string(), None, None);
        }
    }

    (fallback(), None, None)
}

/// Read a JSON body from a successful response, or classify the failure
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(classify(status, &text));
    }
    serde_json::from_str(&text).map_err(|e| {
        ApiError::Transient(PlatformError::Posting(format!(
            "Unexpected response body: {}",
            e
        )))
    })
}

/// Require a success status and discard the body
pub async fn expect_success(response: reqwest::Response) -> ApiResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    Err(classify(status, &text))
}
