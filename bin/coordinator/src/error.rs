//! API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flotilla_registry::{DiscoveryError, RegistryError};
use rootcause::prelude::Report;
use serde::Serialize;

/// Errors returned by the management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::NotFound { .. } => Self::NotFound(message),
            RegistryError::AlreadyRegistered { .. } => Self::Conflict(message),
            RegistryError::InvalidPattern { .. } => Self::BadRequest(message),
        }
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        let message = err.to_string();
        match err {
            DiscoveryError::NotFound { .. } => Self::NotFound(message),
            DiscoveryError::InvalidPattern { .. } | DiscoveryError::UnknownStrategy { .. } => {
                Self::BadRequest(message)
            }
        }
    }
}

impl From<Report<RegistryError>> for ApiError {
    fn from(report: Report<RegistryError>) -> Self {
        report.current_context().clone().into()
    }
}

impl From<Report<DiscoveryError>> for ApiError {
    fn from(report: Report<DiscoveryError>) -> Self {
        report.current_context().clone().into()
    }
}
