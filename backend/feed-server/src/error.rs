//! Error types for the feed server.
//!
//! Internal failures surface as 500, unknown feed pages and entries as 404,
//! a malformed version segment as 400.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

/// Result type for feed-server handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Feed page or entry does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request (non-numeric version, etc.)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<atom_feed::AtomError> for AppError {
    fn from(err: atom_feed::AtomError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_propagation_policy() {
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::NotFound("feed-0".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::BadRequest("bad version".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
