// =============================================================================
// FlowtraceError -> HTTP response mapping (spec.md §7 propagation policy)
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::error::FlowtraceError;

pub struct ApiError(pub FlowtraceError);

impl From<FlowtraceError> for ApiError {
    fn from(e: FlowtraceError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            FlowtraceError::Precondition(_) => (StatusCode::BAD_REQUEST, "precondition"),
            FlowtraceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            FlowtraceError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            FlowtraceError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            FlowtraceError::InvariantViolated(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violated"),
            FlowtraceError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "API façade returning 500");
        }

        let body = serde_json::json!({
            "error": kind,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Maps a `Response::Error{kind,..}` that crossed the IPC boundary back into
/// a `FlowtraceError` so `ApiError`'s mapping above can be reused uniformly,
/// whether the error originated locally (e.g. bad query params) or at the
/// Persistence Service (§7: errors propagate, they are not re-interpreted
/// per layer).
pub fn ipc_error_to_flowtrace(kind: &str, message: String) -> FlowtraceError {
    match kind {
        "precondition" => FlowtraceError::Precondition(message),
        "not_found" => FlowtraceError::NotFound(message),
        "invariant_violated" => FlowtraceError::InvariantViolated(message),
        "fatal" => FlowtraceError::Fatal(message),
        "timeout" => FlowtraceError::Timeout(std::time::Duration::from_secs(0)),
        _ => FlowtraceError::Transient(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_maps_to_400() {
        let resp = ApiError(FlowtraceError::Precondition("bad".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = ApiError(FlowtraceError::NotFound("missing".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn timeout_maps_to_504() {
        let resp = ApiError(FlowtraceError::Timeout(std::time::Duration::from_secs(1))).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn transient_maps_to_503() {
        let resp = ApiError(FlowtraceError::Transient("down".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invariant_and_fatal_map_to_500() {
        let a = ApiError(FlowtraceError::InvariantViolated("x".into())).into_response();
        let b = ApiError(FlowtraceError::Fatal("y".into())).into_response();
        assert_eq!(a.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(b.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
