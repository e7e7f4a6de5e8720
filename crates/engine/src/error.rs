//! Unified error handling for the engine's HTTP API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{AllocationError, IngestError, LifecycleError};

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Search or allocation failed.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or wrong credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Malformed(message) => Self::BadRequest(message),
            IngestError::Repository(e) => Self::Database(e),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::OrderNotFound(id) => Self::NotFound(format!("order {id}")),
            LifecycleError::Repository(e) => Self::Database(e),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Allocation(e) => match e {
                AllocationError::UnknownStore(_) | AllocationError::OrderNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                AllocationError::StoreDisabled(_) => StatusCode::FORBIDDEN,
                AllocationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AllocationError::NotAllocatable(_)
                | AllocationError::LocationNotEnabled(_)
                | AllocationError::NoLocationsNearby
                | AllocationError::NoCapacity => StatusCode::CONFLICT,
                AllocationError::Credential(_) | AllocationError::Provider(_) => {
                    StatusCode::BAD_GATEWAY
                }
                AllocationError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                AllocationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Short machine-readable code for clients.
    fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Internal(_) => "internal",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Allocation(e) => match e {
                AllocationError::UnknownStore(_) => "unknown_shop",
                AllocationError::StoreDisabled(_) => "shop_disabled",
                AllocationError::OrderNotFound(_) => "not_found",
                AllocationError::NotAllocatable(_) => "not_allocatable",
                AllocationError::LocationNotEnabled(_) => "location_not_enabled",
                AllocationError::NoLocationsNearby => "no_locations_nearby",
                AllocationError::NoCapacity => "no_capacity",
                AllocationError::Credential(_) => "provider_credentials",
                AllocationError::ProviderUnavailable { .. } => "pending_retry",
                AllocationError::Provider(_) => "provider_rejected",
                AllocationError::InvalidInput(_) => "bad_request",
                AllocationError::Repository(_) => "internal",
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Engine request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_)
            | Self::Internal(_)
            | Self::Allocation(AllocationError::Repository(_)) => {
                "Internal server error".to_string()
            }
            Self::Allocation(AllocationError::Credential(_) | AllocationError::Provider(_)) => {
                "External service error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
