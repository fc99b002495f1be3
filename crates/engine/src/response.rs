use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet::FleetError;
use sandbox::SandboxError;
use serde_json::json;
use tracing::{error, warn};

/// Error returned by an HTTP handler.
///
/// Fleet failures render as `{message}`; sandbox failures render as
/// `{error: {kind, message}}` so callers can tell compile, runtime and
/// resource-limit failures apart.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Fleet(FleetError),
    Sandbox(SandboxError),
}

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        Self::Fleet(e)
    }
}

impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        Self::Sandbox(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

fn sandbox_status(e: &SandboxError) -> StatusCode {
    match e {
        SandboxError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SandboxError::ConcurrencyLimit { .. } => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_program_fault() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            Self::Fleet(e) if e.is_validation() => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": e.to_string() }))).into_response()
            }
            Self::Fleet(e) => {
                error!(error = %e, "fleet request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": e.to_string() })),
                )
                    .into_response()
            }
            Self::Sandbox(e) => {
                let status = sandbox_status(&e);
                if status.is_server_error() {
                    warn!(kind = e.kind(), error = %e, "execution request failed");
                }
                let body = json!({ "error": { "kind": e.kind(), "message": e.to_string() } });
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: impl Into<ApiError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn fleet_errors_map_to_400_and_500() {
        assert_eq!(status(FleetError::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(FleetError::Build(fleet::ProviderError::Build("docker".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn sandbox_errors_map_by_cause() {
        assert_eq!(status(SandboxError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(SandboxError::Compile("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(SandboxError::Runtime("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status(SandboxError::MemoryExceeded { limit_mb: 128 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(SandboxError::Timeout { timeout_ms: 10 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(SandboxError::ConcurrencyLimit { max: 8 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(SandboxError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
