//! Response body classification
//!
//! Success bodies become `ParsedBody` (JSON when the content type says so,
//! raw text otherwise). Failure bodies become either a structured or an
//! unstructured `ApiError` depending on whether they parse as a JSON object.
//! `decode_envelope` unwraps the backend's `{status, data, message}` shape so
//! a `status: false` reply can never be mistaken for data.

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, Result};

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Json(Value),
    Text(String),
}

impl ParsedBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedBody::Json(value) => Some(value),
            ParsedBody::Text(_) => None,
        }
    }
}

/// Parse a 2xx body according to its content type.
///
/// Any `json` media type (`application/json`, `application/problem+json`)
/// is parsed; an empty JSON body becomes `null`.
pub(crate) fn parse_success(content_type: Option<&str>, text: String) -> Result<ParsedBody> {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    if !is_json {
        return Ok(ParsedBody::Text(text));
    }
    if text.trim().is_empty() {
        return Ok(ParsedBody::Json(Value::Null));
    }
    serde_json::from_str(&text)
        .map(ParsedBody::Json)
        .map_err(|e| ApiError::Decode(format!("response declared JSON but did not parse: {e}")))
}

/// Turn a non-success response into the matching error kind.
pub(crate) fn classify_failure(status: StatusCode, text: String) -> ApiError {
    match serde_json::from_str::<Value>(&text) {
        Ok(body @ Value::Object(_)) => {
            let message = error_message(&body).unwrap_or_else(|| status_text(status));
            ApiError::Structured {
                status: status.as_u16(),
                code: error_code(&body),
                message,
                body,
            }
        }
        _ => ApiError::UnstructuredHttp {
            status: status.as_u16(),
            status_text: status_text(status),
            body: text,
        },
    }
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown Status").to_string()
}

/// Machine-readable code: `code`, a string `error`, or `error.code`/`error.type`.
fn error_code(body: &Value) -> Option<String> {
    let candidate = body
        .get("code")
        .or_else(|| body.get("error").filter(|e| e.is_string()))
        .or_else(|| body.pointer("/error/code"))
        .or_else(|| body.pointer("/error/type"))?;
    match candidate {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn error_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.pointer("/error/message"))
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "envelope_ok")]
    status: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn envelope_ok() -> bool {
    true
}

/// Unwrap `{status, data, message}` into `T`.
///
/// `status: false` is an error even on HTTP 200. A missing `data` decodes
/// as `null`, which suits `Option<T>` and `()`.
pub fn decode_envelope<T: DeserializeOwned>(value: Value) -> Result<T> {
    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| ApiError::Decode(format!("response is not an API envelope: {e}")))?;

    if !envelope.status {
        return Err(ApiError::Structured {
            status: StatusCode::OK.as_u16(),
            code: error_code(&value),
            message: envelope
                .message
                .unwrap_or_else(|| "request was not successful".into()),
            body: value,
        });
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null))
        .map_err(|e| ApiError::Decode(format!("unexpected data shape: {e}")))
}
