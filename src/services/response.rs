//! HTTP response building helpers
//!
//! Error bodies carry a machine-readable `code` and a `retryable` flag so
//! the client knows whether to re-issue with the same idempotency key.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::ProgressError;

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a JSON response with 202 Accepted status
pub fn accepted<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::ACCEPTED, body)
}

fn error_body(status: StatusCode, code: &str, message: &str, retryable: bool) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({ "error": message, "code": code, "retryable": retryable }),
    )
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, "not_found", message, false)
}

/// Build a 400 Bad Request response with message
pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::BAD_REQUEST, "invalid_input", message, false)
}

/// Build a 401 response for requests without an authenticated user
pub fn unauthorized(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::UNAUTHORIZED, "unauthenticated", message, false)
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed", false)
}

/// Build a 403 response for an authenticated caller without the needed role
pub fn forbidden(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::FORBIDDEN, "forbidden", message, false)
}

/// Convert a ProgressError to an appropriate HTTP response
pub fn error_response(error: ProgressError) -> Response<Full<Bytes>> {
    if error.is_retryable() {
        return error_body(StatusCode::CONFLICT, "conflict", &error.to_string(), true);
    }

    let (status, code, message) = match &error {
        ProgressError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "invalid_input", msg.clone()),
        ProgressError::Json(e) => (StatusCode::BAD_REQUEST, "invalid_input", format!("JSON error: {}", e)),
        ProgressError::AlreadyCompleted { .. } => {
            (StatusCode::CONFLICT, "already_completed", error.to_string())
        }
        ProgressError::Locked(_) => (StatusCode::FORBIDDEN, "locked", error.to_string()),
        ProgressError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
        ProgressError::Pool(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", error.to_string()),
        _ => {
            error!(error = %error, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal", error.to_string())
        }
    };

    error_body(status, code, &message, false)
}

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, ProgressError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}
