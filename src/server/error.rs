//! HTTP mapping for [`crate::Error`]

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::Error;

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl Error {
    /// Machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage_error",
            Self::Io(_) => "io_error",
            Self::ForeignStore { .. } => "foreign_store",
            Self::Migration { .. } => "migration_failed",
            Self::DuplicateMigration(_) => "duplicate_migration",
            Self::MigrationSource(_) => "migration_source",
            Self::TransactionRequired => "transaction_required",
            Self::TransactionClosed => "transaction_closed",
            Self::CommitFailed(_) => "commit_failed",
            Self::Task(_) => "internal_error",
            Self::Config(_) => "config_error",
            Self::Unauthenticated => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::DuplicateName(_) => "duplicate_name",
            Self::InvalidType(_) => "invalid_type",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DuplicateName(_) => StatusCode::CONFLICT,
            Self::InvalidType(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_)
            | Self::Io(_)
            | Self::ForeignStore { .. }
            | Self::Migration { .. }
            | Self::DuplicateMigration(_)
            | Self::MigrationSource(_)
            | Self::TransactionRequired
            | Self::TransactionClosed
            | Self::CommitFailed(_)
            | Self::Task(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }

        // Store internals stay in the log
        let message = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidInput(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::InvalidInput(rejection.body_text())
    }
}
