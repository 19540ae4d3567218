//! Translates upstream error responses between OpenAI/Gemini/Claude shapes,
//! and builds the canonical OpenAI error envelope the gateway itself returns.

use axum::{http::StatusCode, response::Response, Json};
use serde_json::{json, Value};

fn error_type_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        401 => "authentication_error",
        403 => "permission_denied_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        400..=499 => "invalid_request_error",
        _ => "api_error",
    }
}

fn gemini_status_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        400..=499 => "INVALID_ARGUMENT",
        _ => "INTERNAL",
    }
}

/// Canonical OpenAI-shaped error body: `{"error": {message, type, param, code}}`.
pub fn openai_error_body(message: &str, error_type: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": null,
            "code": null,
        }
    })
}

pub fn openai_error_response(status: StatusCode, message: &str) -> Response {
    let body = openai_error_body(message, error_type_for(status));
    (status, Json(body)).into_response()
}

pub fn claude_error_body(message: &str, status: StatusCode) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error_type_for(status),
            "message": message,
        }
    })
}

pub fn gemini_error_body(message: &str, status: StatusCode) -> Value {
    json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "status": gemini_status_for(status),
        }
    })
}

/// Best-effort extraction of a human-readable message from an upstream error
/// body regardless of which of the three shapes it arrived in.
pub fn extract_message(body: &Value) -> String {
    if let Some(msg) = body.pointer("/error/message").and_then(Value::as_str) {
        return msg.to_string();
    }
    if let Some(msg) = body.get("message").and_then(Value::as_str) {
        return msg.to_string();
    }
    "upstream error".to_string()
}

/// Rewrites an upstream error body plus status into the shape a given
/// downstream provider surface expects.
pub fn convert_upstream_error(body: &Value, status: StatusCode, target: &str) -> Value {
    let message = extract_message(body);
    match target {
        "claude" => claude_error_body(&message, status),
        "gemini" => gemini_error_body(&message, status),
        _ => openai_error_body(&message, error_type_for(status)),
    }
}

use axum::response::IntoResponse;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_429_to_rate_limit_and_resource_exhausted() {
        assert_eq!(error_type_for(StatusCode::TOO_MANY_REQUESTS), "rate_limit_error");
        assert_eq!(gemini_status_for(StatusCode::TOO_MANY_REQUESTS), "RESOURCE_EXHAUSTED");
    }

    #[test]
    fn claude_shape_has_nested_error_type() {
        let body = claude_error_body("boom", StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "authentication_error");
    }

    #[test]
    fn extracts_message_from_openai_shape() {
        let body = json!({"error": {"message": "bad key", "type": "authentication_error"}});
        assert_eq!(extract_message(&body), "bad key");
    }
}
