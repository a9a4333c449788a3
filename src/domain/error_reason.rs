/// Error taxonomy normalization
///
/// Engine errors arrive in several shapes depending on the client generation
/// (ES 6.x raw bodies, ES 7.x / OpenSearch `meta.body` envelopes, bare
/// `found:false` documents). They are folded into one [`ErrorReason`] whose
/// message is always `"<status> <TYPE> - <reason>"`. Callers branch on that
/// prefix, so the format must not change.
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Reason type labels used across the crate
pub mod labels {
    pub const NOT_FOUND: &str = "NOT FOUND";
    pub const IN_USE: &str = "IN USE";
    pub const MAPPER_PARSING: &str = "MAPPER PARSING";
    pub const ILLEGAL_ARGUMENT: &str = "ILLEGAL ARGUMENT";
    pub const ACTION_REQUEST_VALIDATION: &str = "ACTION REQUEST VALIDATION";
    pub const VERSION_CONFLICT_ENGINE: &str = "VERSION CONFLICT ENGINE";
    pub const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE ALREADY EXISTS";
    pub const TIMEOUT: &str = "TIMEOUT";
}

/// Structured reason attached to a normalized error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonDetail {
    pub status: u16,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
}

/// Normalized error
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct ErrorReason {
    pub status: u16,
    pub message: String,
    pub reason: ReasonDetail,
}

impl ErrorReason {
    /// Build from an already-normalized type label (e.g. `NOT FOUND`)
    pub fn new(status: u16, label: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status,
            message: format!("{status} {label} - {reason}"),
            reason: ReasonDetail {
                status,
                r#type: label.to_string(),
                reason: Some(reason),
                cause: None,
            },
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, labels::NOT_FOUND, reason)
    }

    pub fn in_use(reason: impl Into<String>) -> Self {
        Self::new(400, labels::IN_USE, reason)
    }

    pub fn mapper_parsing(reason: impl Into<String>) -> Self {
        Self::new(400, labels::MAPPER_PARSING, reason)
    }

    pub fn illegal_argument(reason: impl Into<String>) -> Self {
        Self::new(400, labels::ILLEGAL_ARGUMENT, reason)
    }

    pub fn action_request_validation(reason: impl Into<String>) -> Self {
        Self::new(400, labels::ACTION_REQUEST_VALIDATION, reason)
    }

    pub fn version_conflict(reason: impl Into<String>) -> Self {
        Self::new(409, labels::VERSION_CONFLICT_ENGINE, reason)
    }

    pub fn resource_already_exists(reason: impl Into<String>) -> Self {
        Self::new(400, labels::RESOURCE_ALREADY_EXISTS, reason)
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(500, labels::TIMEOUT, reason)
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.reason.cause = Some(cause);
        self
    }

    /// Whether the reason type equals `label`
    pub fn is(&self, label: &str) -> bool {
        self.reason.r#type == label
    }

    /// Whether the message starts with `prefix` (e.g. `404 NOT FOUND`)
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.message.starts_with(prefix)
    }

    /// Derive a label from an engine exception class name
    ///
    /// `resource_already_exists_exception` becomes `RESOURCE ALREADY EXISTS`:
    /// split on `_`, drop a trailing `exception`/`error` token, upper-case.
    pub fn label_of(class_name: &str) -> String {
        let lower = class_name.trim().to_lowercase();
        let mut tokens: Vec<&str> = lower
            .split(|c: char| c == '_' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.len() > 1 && matches!(tokens.last(), Some(&"exception") | Some(&"error")) {
            tokens.pop();
        }
        tokens.join(" ").to_uppercase()
    }

    /// Parse a formatted message (`"<status> <TYPE> - <reason>"`) back into a reason
    pub fn parse_message(message: &str) -> Option<Self> {
        let (status, rest) = message.split_once(' ')?;
        if status.len() != 3 {
            return None;
        }
        let status: u16 = status.parse().ok()?;
        let (label, reason) = rest.split_once(" - ").unwrap_or((rest, ""));
        let label_ok = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' ');
        if !label_ok {
            return None;
        }
        Some(Self::new(status, label, reason))
    }

    /// Normalize an arbitrary error payload
    ///
    /// Returns `None` when nothing recognizable is found; the caller is expected
    /// to log and propagate the original error unchanged.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if !payload.is_object() {
            return payload.as_str().and_then(Self::parse_message);
        }

        if let Some(normalized) = Self::from_normalized(payload) {
            return Some(normalized);
        }

        // ES 7.x / OpenSearch client: { meta: { statusCode, body } }
        if let Some(meta) = payload.get("meta").filter(|m| m.is_object()) {
            let status = status_of(meta.get("statusCode"));
            if let Some(body) = meta.get("body").and_then(decode_body)
                && let Some(reason) = Self::from_body(&body, status)
            {
                return Some(reason);
            }
        }

        // ES 6.x client: { statusCode, body | response: <string or object> }
        let status = status_of(payload.get("statusCode")).or_else(|| status_of(payload.get("status")));
        for field in ["body", "response"] {
            if let Some(body) = payload.get(field).and_then(decode_body)
                && let Some(reason) = Self::from_body(&body, status)
            {
                return Some(reason);
            }
        }

        // raw HTTP body
        if let Some(reason) = Self::from_body(payload, status) {
            return Some(reason);
        }

        payload
            .get("message")
            .and_then(|m| m.as_str())
            .and_then(Self::parse_message)
    }

    /// Normalize a raw HTTP response (status code plus body text)
    pub fn from_response(status: u16, body: &str) -> Option<Self> {
        let body = serde_json::from_str::<Value>(body).ok()?;
        Self::from_body(&body, Some(status))
    }

    fn from_normalized(payload: &Value) -> Option<Self> {
        let detail = payload.get("reason").filter(|r| r.is_object())?;
        let label = detail.get("type").and_then(|t| t.as_str())?;
        let status = status_of(detail.get("status")).or_else(|| status_of(payload.get("status")))?;
        let reason = detail.get("reason").and_then(|r| r.as_str()).unwrap_or_default();
        let mut normalized = Self::new(status, label, reason);
        normalized.reason.cause = detail.get("cause").cloned();
        Some(normalized)
    }

    fn from_body(body: &Value, fallback_status: Option<u16>) -> Option<Self> {
        let status = status_of(body.get("status")).or(fallback_status);

        match body.get("error") {
            Some(Value::Object(error)) => {
                let root = error
                    .get("root_cause")
                    .and_then(|r| r.as_array())
                    .and_then(|r| r.first());
                let class = root
                    .and_then(|r| r.get("type"))
                    .or_else(|| error.get("type"))
                    .and_then(|t| t.as_str())?;
                let reason = root
                    .and_then(|r| r.get("reason"))
                    .or_else(|| error.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or_default();
                let label = Self::label_of(class);
                let status = status.unwrap_or(500);
                let mut normalized = Self::new(status, &label, reason);
                normalized.reason.cause = error.get("caused_by").cloned();
                Some(normalized)
            }
            Some(Value::String(reason)) => {
                let status = status.unwrap_or(500);
                let label = match status {
                    404 => labels::NOT_FOUND.to_string(),
                    408 | 504 => labels::TIMEOUT.to_string(),
                    _ => "UNKNOWN".to_string(),
                };
                Some(Self::new(status, &label, reason.as_str()))
            }
            _ => {
                let found = body.get("found").and_then(|f| f.as_bool());
                let result = body.get("result").and_then(|r| r.as_str());
                if found == Some(false) || result == Some("not_found") {
                    let reason = match body.get("_id").and_then(|i| i.as_str()) {
                        Some(id) => format!("id:{id}"),
                        None => "not found".to_string(),
                    };
                    return Some(Self::not_found(reason));
                }
                None
            }
        }
    }
}

fn status_of(value: Option<&Value>) -> Option<u16> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn decode_body(body: &Value) -> Option<Value> {
    match body {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Object(_) => Some(body.clone()),
        _ => None,
    }
}
