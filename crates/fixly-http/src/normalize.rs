//! Conversion of transport and HTTP failures into [`ApiError`].
//!
//! These functions are pure: they never touch credentials.

use serde_json::Value;

use fixly_core::ApiError;
use fixly_core::error::GENERIC_ERROR_MESSAGE;

pub const CODE_TIMEOUT: &str = "TIMEOUT";
pub const CODE_CONNECTION_FAILED: &str = "CONNECTION_FAILED";
pub const CODE_INVALID_RESPONSE: &str = "INVALID_RESPONSE";
pub const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const CODE_NETWORK_ERROR: &str = "NETWORK_ERROR";

/// A failure where no usable response was received.
pub fn from_transport(err: &reqwest::Error) -> ApiError {
    let code = if err.is_timeout() {
        CODE_TIMEOUT
    } else if err.is_connect() {
        CODE_CONNECTION_FAILED
    } else if err.is_decode() || err.is_body() {
        CODE_INVALID_RESPONSE
    } else if err.is_builder() {
        CODE_INVALID_REQUEST
    } else {
        CODE_NETWORK_ERROR
    };

    let message = err.to_string();
    let message = if message.trim().is_empty() {
        GENERIC_ERROR_MESSAGE.to_string()
    } else {
        message
    };

    ApiError::new(message).with_code(code)
}

/// A non-2xx response.
///
/// The message is taken from the body's `detail` field, then `message`, then
/// `error`, then a description of the status. `data` holds the parsed body, or
/// the raw text when it is not JSON.
pub fn from_response(status: u16, body: &[u8]) -> ApiError {
    let data = parse_body(body);

    let message = data
        .as_ref()
        .and_then(|body| {
            string_field(body, "detail")
                .or_else(|| string_field(body, "message"))
                .or_else(|| string_field(body, "error"))
        })
        .unwrap_or_else(|| format!("Request failed with status code {}", status));

    let code = data.as_ref().and_then(|body| {
        code_field(body, "code").or_else(|| code_field(body, "error"))
    });

    ApiError {
        message,
        status: Some(status),
        code,
        data,
    }
}

/// A successful response whose body could not be decoded.
pub fn from_decode(status: u16, err: &serde_json::Error) -> ApiError {
    let mut error = ApiError::new(format!("invalid response body: {}", err))
        .with_code(CODE_INVALID_RESPONSE);
    // Keep the status so callers can see the server did answer.
    error.status = Some(status);
    error
}

fn parse_body(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(body).into_owned())),
    }
}

fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn code_field(body: &Value, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
