//! Response body interpretation
//!
//! The upstream wraps most API payloads as
//! `{"error": false, "message": "", "body": {...}}`. A missing `error` field
//! or an unparsable document is a malformed response; `error: true` is a
//! resource-level failure carrying `message`.

use serde_json::Value;

use super::error::ErrorKind;
use super::request::BodyKind;
use crate::utils::truncate_with_suffix;

const MESSAGE_PREVIEW_CHARS: usize = 200;

/// Interpret a 2xx body according to the expected shape.
pub fn interpret(kind: BodyKind, status: u16, body: &str) -> Result<Value, ErrorKind> {
    match kind {
        BodyKind::Raw => Ok(Value::String(body.to_string())),
        BodyKind::Json => parse(body),
        BodyKind::Envelope => unwrap_envelope(status, parse(body)?),
    }
}

/// Best-effort human message for a non-2xx body.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            if !message.is_empty() {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        truncate_with_suffix(trimmed, MESSAGE_PREVIEW_CHARS, "...")
    }
}

fn parse(body: &str) -> Result<Value, ErrorKind> {
    serde_json::from_str(body).map_err(|e| ErrorKind::MalformedResponse {
        reason: format!("invalid JSON: {}", e),
    })
}

fn unwrap_envelope(status: u16, mut value: Value) -> Result<Value, ErrorKind> {
    let flag = value
        .get("error")
        .ok_or_else(|| ErrorKind::MalformedResponse {
            reason: "missing 'error' field in envelope".to_string(),
        })?;

    if is_truthy(flag) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ErrorKind::Application { status, message });
    }

    Ok(value
        .get_mut("body")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

// Lenient boolean, the upstream has been seen sending 0/1 and "true"
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => matches!(s.as_str(), "true" | "1"),
        _ => false,
    }
}
