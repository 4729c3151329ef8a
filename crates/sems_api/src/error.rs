use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sems_core::{ErrorKind, StationError};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// Failures of a request, as HTTP responses
pub enum ApiError {
    /// The station refused the operation
    Station(StationError),
    /// The body or the path could not be read
    Request(String),
}

impl From<StationError> for ApiError {
    fn from(error: StationError) -> Self {
        ApiError::Station(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, error) = match self {
            ApiError::Station(error) => (error.kind(), error.to_string()),
            ApiError::Request(message) => (ErrorKind::Validation, message),
        };
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if kind == ErrorKind::Internal {
            tracing::error!(%error, "Request failed on an internal error");
        }

        (status, Json(ErrorResponse { error, kind })).into_response()
    }
}
