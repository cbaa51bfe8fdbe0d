//! Shared API types
//!
//! Every failure is answered with the same JSON shape:
//! `{"error": <category>, "message": <summary>, "detail": <diagnostic>}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::BridgeError;

/// Fault body returned by every endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable category label (`validation_error`, `resource_not_found`,
    /// `no_matching_storage_unit`, `broker_fault`, `not_found`)
    pub error: String,
    /// Short human readable summary
    pub message: String,
    /// Diagnostic text from the broker, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest {
        message: String,
        detail: Option<String>,
    },
    NotFound {
        message: String,
    },
    /// A bridge operation failed; `message` summarizes the operation
    Bridge {
        message: String,
        source: BridgeError,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            detail: None,
        }
    }

    pub fn bad_request_with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn bridge(message: impl Into<String>, source: BridgeError) -> Self {
        Self::Bridge {
            message: message.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Bridge {
                source: BridgeError::Validation(_),
                ..
            } => StatusCode::BAD_REQUEST,
            // Missing resources are still server faults for this API
            Self::Bridge { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(self) -> ErrorBody {
        match self {
            Self::BadRequest { message, detail } => ErrorBody {
                error: "validation_error".to_string(),
                message,
                detail,
            },
            Self::NotFound { message } => ErrorBody {
                error: "not_found".to_string(),
                message,
                detail: None,
            },
            Self::Bridge { message, source } => ErrorBody {
                error: source.category().to_string(),
                message,
                detail: Some(source.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
