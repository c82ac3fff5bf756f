//! Error types for the outbox publisher library.

use thiserror::Error;

/// Result type alias for publisher operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Errors that can occur while draining the outbox.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Fatal configuration error: the loop was started with an empty registry
    #[error("no event processors registered")]
    NoProcessorsRegistered,

    /// A processor failed its one-time initialization
    #[error("processor '{name}' failed to initialize: {source}")]
    ProcessorInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Gateway-level failure (connection budget, classification)
    #[error(transparent)]
    Db(#[from] db_pool::DbError),

    /// Statement-level failure
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The consecutive-error threshold was exceeded
    #[error("aborting after {consecutive} consecutive failed iterations")]
    TooManyFailures { consecutive: u32 },
}

impl PublishError {
    /// Fatal errors terminate the loop; everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PublishError::NoProcessorsRegistered
                | PublishError::ProcessorInit { .. }
                | PublishError::TooManyFailures { .. }
        )
    }

    /// Whether the failure is connection-class and warrants a reconnect.
    pub fn is_connection_error(&self) -> bool {
        match self {
            PublishError::Db(e) => e.is_connection_error(),
            PublishError::Sqlx(e) => db_pool::is_connection_error(e),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_fatal() {
        assert!(PublishError::NoProcessorsRegistered.is_fatal());
        assert!(!PublishError::NoProcessorsRegistered.is_connection_error());
    }

    #[test]
    fn statement_errors_are_retried() {
        let err = PublishError::Sqlx(sqlx::Error::RowNotFound);
        assert!(!err.is_fatal());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn lost_connections_request_reconnect() {
        let err = PublishError::Sqlx(sqlx::Error::PoolTimedOut);
        assert!(!err.is_fatal());
        assert!(err.is_connection_error());
    }
}
