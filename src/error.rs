//! Normalized error taxonomy for storefront API calls.
//!
//! Every failure surfaced by the HTTP wrapper is one of these variants, keyed
//! by where it came from rather than by the underlying transport error.

use std::collections::BTreeMap;
use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";
pub const ALREADY_RATED: &str = "ALREADY_RATED";

/// Fieldless discriminant of [`ApiError`], handy for matching in callers and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    AuthRequired,
    AlreadyDone,
    ValidationFailed,
    NotFound,
    ServerError,
    Unknown,
    Network,
    Decode,
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,

    #[error("{}", AUTH_REQUIRED_MESSAGE)]
    AuthRequired,

    /// Duplicate submission (409, or a server message mentioning "already")
    #[error("{}", ALREADY_RATED)]
    AlreadyDone { message: String },

    #[error("{message}")]
    ValidationFailed {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    ServerError { status: u16, message: String },

    #[error("{message}")]
    Unknown { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Timeout => ErrorKind::Timeout,
            ApiError::AuthRequired => ErrorKind::AuthRequired,
            ApiError::AlreadyDone { .. } => ErrorKind::AlreadyDone,
            ApiError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::ServerError { .. } => ErrorKind::ServerError,
            ApiError::Unknown { .. } => ErrorKind::Unknown,
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Decode(_) => ErrorKind::Decode,
        }
    }

    /// True for failures that should send the user back to login
    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::AuthRequired
    }

    /// Map a non-success HTTP status and its (possibly empty) body to an error.
    ///
    /// 401/403 are only mapped here once every header scheme has been tried;
    /// the fallback loop in `http` decides when that is.
    pub fn from_status(status: u16, status_text: &str, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(extract_message)
            .unwrap_or_else(|| format!("{} {}", status, status_text).trim().to_string());

        if status == 409 || message.to_lowercase().contains("already") {
            return ApiError::AlreadyDone { message };
        }

        match status {
            401 | 403 => ApiError::AuthRequired,
            400 => ApiError::ValidationFailed {
                fields: parsed.as_ref().map(extract_fields).unwrap_or_default(),
                message,
            },
            404 => ApiError::NotFound { message },
            500..=599 => ApiError::ServerError { status, message },
            _ => ApiError::Unknown { status, message },
        }
    }
}

/// Pull a human-readable message out of a JSON error body: `message`, then `detail`, then `error`
fn extract_message(body: &serde_json::Value) -> Option<String> {
    ["message", "detail", "error"].iter().find_map(|key| {
        match body.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    })
}

/// Collect `{"field": ["msg", ...]}` or `{"field": "msg"}` pairs from a 400 body
fn extract_fields(body: &serde_json::Value) -> BTreeMap<String, Vec<String>> {
    let mut fields = BTreeMap::new();
    let Some(obj) = body.as_object() else {
        return fields;
    };

    for (key, value) in obj {
        if matches!(key.as_str(), "message" | "detail" | "error") {
            continue;
        }
        let messages: Vec<String> = match value {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };
        if !messages.is_empty() {
            fields.insert(key.clone(), messages);
        }
    }
    fields
}
