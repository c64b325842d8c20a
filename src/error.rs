use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::process::Status;

/// Result alias used by every fallible operation of the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the SLIPO client.
///
/// HTTP status codes are mapped onto these variants once, when a response is
/// received; callers never see raw transport codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The API key was rejected.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The host could not be reached or the connection broke.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The remote file, resource or process does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The key is valid but not allowed to perform the request.
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Invalid client configuration or filter options.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A job did not reach a terminal status in time. The remote job keeps running.
    #[error("timed out after {elapsed:?} waiting for {target} (last status {last_status})")]
    Timeout {
        target: String,
        last_status: Status,
        elapsed: Duration,
    },

    /// The server failed (HTTP 5xx). Generally retryable.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The request payload was rejected, either locally or by the server (HTTP 4xx).
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Polling was abandoned through a cancellation token.
    #[error("polling {target} was cancelled")]
    Cancelled { target: String },

    /// Local file system failure while reading an upload or writing a download.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl Error {
    /// Whether a caller may retry the failed call.
    ///
    /// The client itself never retries; see [`crate::retry::with_backoff`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Server { .. } | Error::Network { .. })
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request to {} timed out", url)
        } else if err.is_connect() {
            format!("could not connect to {}", url)
        } else {
            format!("request to {} failed: {}", url, err)
        };
        Error::Network {
            message,
            source: Some(err),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
}

/// `{"success": .., "errors": [..], "error": .., "result": ..}` wrapper used by every JSON endpoint.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiEnvelope {
    #[serde(default)]
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) errors: Vec<ApiErrorDetail>,
    // Some endpoints respond with {"error": "..."} instead of an errors array
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) result: Option<Value>,
}

impl ApiEnvelope {
    pub(crate) fn message(&self) -> String {
        if let Some(first) = self.errors.first() {
            let description = first.description.as_deref().unwrap_or("");
            return match first.code.as_deref() {
                Some(code) if !code.is_empty() => format!("{} ({})", description, code),
                _ => description.to_string(),
            };
        }
        self.error.clone().unwrap_or_default()
    }

    /// Decodes `result` into `T`. A missing result decodes from JSON `null`.
    pub(crate) fn into_result<T: DeserializeOwned>(self, url: &str) -> Result<T> {
        let value = self.result.unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| Error::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Where a request was issued; key validation maps 403 to [`Error::Auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestScope {
    Validate,
    Resource,
}

/// Maps an unsuccessful HTTP response onto the error taxonomy.
pub(crate) fn error_from_status(
    status: StatusCode,
    url: &str,
    body: &str,
    scope: RequestScope,
) -> Error {
    let server_message = serde_json::from_str::<ApiEnvelope>(body)
        .map(|e| e.message())
        .unwrap_or_default();
    let message = if server_message.is_empty() {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.len() > 512 {
            format!("{} ({})", status.canonical_reason().unwrap_or("error"), url)
        } else {
            format!("{} ({})", trimmed, url)
        }
    } else {
        format!("{} ({})", server_message, url)
    };

    match status {
        StatusCode::UNAUTHORIZED => Error::Auth { message },
        StatusCode::FORBIDDEN if scope == RequestScope::Validate => Error::Auth { message },
        StatusCode::FORBIDDEN => Error::Permission { message },
        StatusCode::NOT_FOUND => Error::NotFound { message },
        s if s.is_server_error() => Error::Server {
            status: s.as_u16(),
            message,
        },
        _ => Error::Validation { message },
    }
}

/// A `success: false` envelope returned with HTTP 200.
///
/// The first error code decides the variant, e.g. `ProcessErrorCode.PROCESS_NOT_FOUND`
/// is [`Error::NotFound`]. Unrecognised codes are [`Error::Validation`].
pub(crate) fn error_from_envelope(envelope: &ApiEnvelope, url: &str, scope: RequestScope) -> Error {
    let mut message = envelope.message();
    if message.is_empty() {
        message = "request was not successful".to_string();
    }
    let message = format!("{} ({})", message, url);
    if scope == RequestScope::Validate {
        return Error::Auth { message };
    }

    let code = envelope
        .errors
        .first()
        .and_then(|e| e.code.as_deref())
        .unwrap_or_default()
        .to_ascii_uppercase();
    if code.contains("NOT_FOUND") {
        Error::NotFound { message }
    } else if ["ACCESS_DENIED", "FORBIDDEN", "QUOTA"]
        .iter()
        .any(|c| code.contains(c))
    {
        Error::Permission { message }
    } else if code.contains("AUTHENTICATION") || code.contains("UNAUTHORIZED") {
        Error::Auth { message }
    } else {
        Error::Validation { message }
    }
}
