//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why an authorization check refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    NoUser,
    NoPermissions,
    NotAuthorized,
}

impl AuthFailure {
    pub fn code(self) -> &'static str {
        match self {
            AuthFailure::NoUser => "NO_USER",
            AuthFailure::NoPermissions => "NO_PERMISSIONS",
            AuthFailure::NotAuthorized => "NOT_AUTHORIZED",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("invalid key '{key}' for {entity}")]
    InvalidKey { entity: String, key: String },
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{entity} {key} not found")]
    EntityNotFound { entity: String, key: String },
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("unauthorized: {0}")]
    Unauthorized(AuthFailure),
    /// Business-rule refusal raised by an entity; carries its own status and code.
    #[error("{message}")]
    Rejected {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error("store: {0}")]
    Store(#[from] sqlx::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn invalid_value(field: &str, message: impl Into<String>) -> Self {
        AppError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, key: impl fmt::Display) -> Self {
        AppError::EntityNotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Rejected {
            status: StatusCode::CONFLICT,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidValue { .. }
            | AppError::InvalidKey { .. }
            | AppError::UnknownField(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::EntityNotFound { .. } | AppError::UnknownMethod(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Rejected { status, .. } => *status,
            AppError::Store(_) | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidValue { .. } => "INVALID_VALUE",
            AppError::InvalidKey { .. } => "INVALID_KEY",
            AppError::UnknownField(_) => "UNKNOWN_FIELD",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            AppError::UnknownMethod(_) => "UNKNOWN_METHOD",
            AppError::Unauthorized(failure) => failure.code(),
            AppError::Rejected { code, .. } => code,
            AppError::Store(_) => "STORE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self {
            AppError::Validation(fields) => Some(serde_json::json!({ "fields": fields })),
            _ => None,
        };
        // Store failures were already logged with their SQL where they happened.
        let message = match &self {
            AppError::Store(_) => "store failure".to_string(),
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "response serialization failed");
                "serialization failure".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
