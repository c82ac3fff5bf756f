//! Error types and the connection/query failure classifier.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors surfaced by the database gateway.
#[derive(Error, Debug)]
pub enum DbError {
    /// Underlying driver error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Connection could not be (re)established within the retry budget
    #[error("connection unavailable after {retries} attempts: {source}")]
    ConnectionExhausted { retries: u32, source: sqlx::Error },

    /// Connect string did not match `user/password@//host:port/service`
    #[error("invalid connect string: {0}")]
    InvalidConnectString(String),

    /// Required configuration was absent
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Whether this error indicates a lost or unobtainable connection,
    /// as opposed to a statement-level failure. Connection errors warrant
    /// a reconnect attempt; query errors do not.
    pub fn is_connection_error(&self) -> bool {
        match self {
            DbError::Sqlx(e) => is_connection_error(e),
            DbError::ConnectionExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Classify a driver error: `true` for errors of the connection itself
/// (broken socket, TLS failure, exhausted or closed pool), `false` for
/// errors the server reported about a statement.
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_connection_errors() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(is_connection_error(&err));
    }

    #[test]
    fn pool_exhaustion_is_a_connection_error() {
        assert!(is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(is_connection_error(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn statement_errors_are_not_connection_errors() {
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
        assert!(!is_connection_error(&sqlx::Error::ColumnNotFound(
            "feedid".into()
        )));
    }

    #[test]
    fn exhausted_budget_reports_as_connection_error() {
        let err = DbError::ConnectionExhausted {
            retries: 5,
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("5 attempts"));
    }
}
