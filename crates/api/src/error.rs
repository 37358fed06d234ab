//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Saga execution error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    if err.is_conflict() {
        (StatusCode::CONFLICT, err.to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::AlreadyStarted(_) | SagaError::CommandRejected { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ if err.is_conflict() => (StatusCode::CONFLICT, err.to_string()),
        SagaError::TicketList(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AllocatorId;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn saga_errors_map_to_status_codes() {
        let id = AllocatorId::new();
        assert_eq!(status_of(SagaError::NotFound(id).into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(SagaError::AlreadyStarted(id).into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(
                SagaError::IllegalTransition {
                    event: "Completed",
                    phase: "Running"
                }
                .into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(
                SagaError::Domain(DomainError::RetriesExhausted {
                    aggregate_type: "TicketAllocator",
                    aggregate_id: id.to_string(),
                    attempts: 3,
                })
                .into()
            ),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn bad_request_maps_to_400() {
        assert_eq!(
            status_of(ApiError::BadRequest("nope".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
