//! Uniform JSON response helpers for HTTP handlers.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// 200 OK with `{"success": true, ...body}`.
///
/// Object bodies are merged into the envelope; anything else lands under `data`.
pub fn api_success<T: Serialize>(body: T) -> Response {
    let mut envelope = json!({ "success": true });
    match serde_json::to_value(body) {
        Ok(Value::Object(fields)) => {
            if let Value::Object(ref mut map) = envelope {
                map.extend(fields);
            }
        }
        Ok(other) => envelope["data"] = other,
        Err(e) => {
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_failed", e);
        }
    }
    Json(envelope).into_response()
}

/// Error with an explicit status and machine-readable code.
pub fn api_error(status: StatusCode, code: &str, message: impl Display) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.to_string(),
            "status": status.as_u16(),
        })),
    )
        .into_response()
}
