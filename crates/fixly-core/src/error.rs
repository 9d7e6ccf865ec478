//! Error types for the Fixly client.
//!
//! Every request made through the client fails with one shape, [`ApiError`],
//! regardless of whether the failure came from the transport, the server or
//! a malformed body. The umbrella [`Error`] type is used by the surrounding
//! plumbing (configuration, storage, input validation).

use std::fmt;
use thiserror::Error;

/// Fallback message used when neither the server nor the transport supplied one.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Code carried by the error returned once the session can no longer be renewed.
pub const CODE_SESSION_EXPIRED: &str = "SESSION_EXPIRED";

/// The unified error type for Fixly operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A request failed (transport, HTTP status or body decoding).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Durable credential storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation errors (invalid URL, malformed values).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),

    /// Configuration could not be loaded.
    #[error("configuration error: {message}")]
    Config { message: String },
}

/// A normalized request failure.
///
/// `status` is absent for transport failures (timeouts, DNS, refused
/// connections), which lets callers tell a flaky network apart from a
/// server verdict. `data` carries the parsed response body when there was one.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// Human-readable message.
    pub message: String,
    /// HTTP status code, if a response was received.
    pub status: Option<u16>,
    /// Machine-readable error code.
    pub code: Option<String>,
    /// Response body, if any.
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            data: None,
        }
    }

    /// Attach an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the response body.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True if no response was received (timeout, DNS, connection failure).
    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }

    /// True if the server rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// True for 404 responses.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// True once the session has ended and the user must log in again.
    pub fn is_session_expired(&self) -> bool {
        self.is_unauthorized() && self.code.as_deref() == Some(CODE_SESSION_EXPIRED)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "HTTP {}", status)?;
            if let Some(ref code) = self.code {
                write!(f, " [{}]", code)?;
            }
            write!(f, ": {}", self.message)
        } else {
            if let Some(ref code) = self.code {
                write!(f, "[{}] ", code)?;
            }
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ApiError {}

/// Durable storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("{message}")]
    Backend { message: String },
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid API base URL.
    #[error("invalid API URL '{value}': {reason}")]
    ApiUrl { value: String, reason: String },
}
