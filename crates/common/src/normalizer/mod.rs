//! Response normalizer
//!
//! The compute layer in front of the knowledge engine emits one of two
//! transport shapes: a direct JSON body, or a proxy envelope
//! `{statusCode, body}` carrying a serialized inner body. This module
//! collapses both into a single `{success, data, error, metadata}` shape
//! and maps HTTP status codes onto a stable error taxonomy.
//!
//! Detection is structural, not duck-typed: a value is a proxy envelope
//! exactly when it has both a numeric `statusCode` and a `body` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two transport shapes the compute layer may emit
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// Proxy envelope: an HTTP-ish response nested inside a payload
    Proxy { status_code: u16, body: String },
    /// Plain body with no wrapping
    Direct(Value),
}

impl RawResponse {
    /// Classify a JSON value into one of the two shapes
    pub fn classify(value: Value) -> RawResponse {
        let is_proxy = value.get("statusCode").and_then(Value::as_u64).is_some()
            && value.get("body").is_some();

        if is_proxy {
            let status_code = value["statusCode"].as_u64().unwrap_or(500) as u16;
            // body is usually a serialized string; tolerate a raw object too
            let body = match &value["body"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            RawResponse::Proxy { status_code, body }
        } else {
            RawResponse::Direct(value)
        }
    }
}

/// Stable error taxonomy for normalized failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    RateLimited,
    Upstream,
    Internal,
}

/// Map an HTTP status code onto the error taxonomy
pub fn error_kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::Validation,
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimited,
        500..=504 => ErrorKind::Upstream,
        _ => ErrorKind::Internal,
    }
}

/// Error half of a normalized response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

/// Unified response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NormalizedResponse {
    fn ok(data: Option<Value>, metadata: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata,
        }
    }

    fn err(kind: ErrorKind, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorEnvelope { kind, message }),
            metadata: None,
        }
    }
}

/// Extract a human-readable message from an error body
fn message_from(value: &Value) -> String {
    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| "Request failed".to_string())
}

/// Normalize an inner body once any envelope has been stripped.
///
/// The inner `success` field decides the data/error split; absence of
/// the field means success.
fn normalize_body(body: Value) -> NormalizedResponse {
    let success = body
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    if !success {
        return NormalizedResponse::err(ErrorKind::Internal, message_from(&body));
    }

    let metadata = body.get("metadata").cloned();
    let data = match body.get("data") {
        Some(data) => Some(data.clone()),
        // No data field: the body itself is the payload
        None => Some(body),
    };

    NormalizedResponse::ok(data, metadata)
}

/// Normalize a raw transport response
pub fn normalize(raw: RawResponse) -> NormalizedResponse {
    match raw {
        RawResponse::Proxy { status_code, body } => {
            let inner: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

            // A wrapped non-2xx is an error regardless of any inner
            // success flag.
            if status_code >= 300 {
                return NormalizedResponse::err(
                    error_kind_for_status(status_code),
                    message_from(&inner),
                );
            }

            normalize_body(inner)
        }
        RawResponse::Direct(value) => normalize_body(value),
    }
}

/// Normalize an HTTP response as received off the wire.
///
/// The outer HTTP status takes precedence: a non-2xx response is an
/// error even when the body parses cleanly. The body may itself be a
/// proxy envelope, which is unwrapped recursively.
pub fn normalize_http(status: u16, body: &str) -> NormalizedResponse {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    if status >= 300 {
        return NormalizedResponse::err(error_kind_for_status(status), message_from(&value));
    }

    normalize(RawResponse::classify(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_proxy_envelope_success_unwraps_data() {
        let raw = RawResponse::classify(json!({
            "statusCode": 200,
            "body": "{\"success\":true,\"data\":[1,2,3]}"
        }));
        assert!(matches!(raw, RawResponse::Proxy { status_code: 200, .. }));

        let normalized = normalize(raw);
        assert!(normalized.success);
        assert_eq!(normalized.data, Some(json!([1, 2, 3])));
        assert!(normalized.error.is_none());
    }

    #[test]
    fn test_proxy_envelope_error_status() {
        let raw = RawResponse::classify(json!({
            "statusCode": 404,
            "body": "{\"message\":\"not found\"}"
        }));

        let normalized = normalize(raw);
        assert!(!normalized.success);
        let error = normalized.error.unwrap();
        assert_eq!(error.kind, ErrorKind::NotFound);
        assert_eq!(error.message, "not found");
    }

    #[test]
    fn test_wrapped_error_status_overrides_inner_success() {
        let raw = RawResponse::classify(json!({
            "statusCode": 502,
            "body": "{\"success\":true,\"data\":{}}"
        }));

        let normalized = normalize(raw);
        assert!(!normalized.success);
        assert_eq!(normalized.error.unwrap().kind, ErrorKind::Upstream);
    }

    #[test]
    fn test_direct_body_success_defaults_true() {
        let raw = RawResponse::classify(json!({"results": [{"score": 0.9}]}));
        assert!(matches!(raw, RawResponse::Direct(_)));

        let normalized = normalize(raw);
        assert!(normalized.success);
        // No data field: the whole body is the payload
        assert_eq!(normalized.data, Some(json!({"results": [{"score": 0.9}]})));
    }

    #[test]
    fn test_direct_body_inner_failure() {
        let raw = RawResponse::classify(json!({
            "success": false,
            "message": "model overloaded"
        }));

        let normalized = normalize(raw);
        assert!(!normalized.success);
        assert_eq!(normalized.error.unwrap().message, "model overloaded");
    }

    #[test]
    fn test_status_code_without_body_is_direct() {
        // Only one of the two marker fields present: not an envelope
        let raw = RawResponse::classify(json!({"statusCode": 200, "data": 5}));
        assert!(matches!(raw, RawResponse::Direct(_)));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(error_kind_for_status(400), ErrorKind::Validation);
        assert_eq!(error_kind_for_status(401), ErrorKind::Auth);
        assert_eq!(error_kind_for_status(404), ErrorKind::NotFound);
        assert_eq!(error_kind_for_status(409), ErrorKind::Conflict);
        assert_eq!(error_kind_for_status(429), ErrorKind::RateLimited);
        assert_eq!(error_kind_for_status(503), ErrorKind::Upstream);
    }

    #[test]
    fn test_normalize_http_outer_status_wins() {
        let normalized = normalize_http(409, "{\"message\":\"job already running\"}");
        assert!(!normalized.success);
        let error = normalized.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Conflict);
        assert_eq!(error.message, "job already running");
    }

    #[test]
    fn test_normalize_http_unwraps_nested_envelope() {
        let body = json!({
            "statusCode": 200,
            "body": "{\"success\":true,\"data\":{\"jobId\":\"j-1\"}}"
        })
        .to_string();

        let normalized = normalize_http(200, &body);
        assert!(normalized.success);
        assert_eq!(normalized.data, Some(json!({"jobId": "j-1"})));
    }

    #[test]
    fn test_metadata_passthrough() {
        let raw = RawResponse::classify(json!({
            "success": true,
            "data": {"answer": "42"},
            "metadata": {"modelId": "m-1"}
        }));

        let normalized = normalize(raw);
        assert_eq!(normalized.metadata, Some(json!({"modelId": "m-1"})));
    }
}
