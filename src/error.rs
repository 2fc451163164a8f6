//! Error types for harvestq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid task: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a connection-level failure worth reconnecting over?
    ///
    /// Transient errors never become task failures; the agent backs off and
    /// resumes consumption.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Io(_) => true,
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| is_connection_sqlstate(&code))
            }
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }
}

/// Class 08 (connection exception), or the server shutting down or not yet
/// accepting connections.
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    /// A server error carrying only a SQLSTATE.
    #[derive(Debug)]
    struct ServerError(&'static str);

    impl std::fmt::Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl sqlx::error::DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn server_error(code: &'static str) -> Error {
        Error::Database(sqlx::Error::Database(Box::new(ServerError(code))))
    }

    #[test]
    fn transport_and_pool_errors_are_transient() {
        assert!(Error::Transport("broker gone".into()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(Error::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(Error::Database(sqlx::Error::WorkerCrashed).is_transient());
    }

    #[test]
    fn connection_sqlstates_are_transient() {
        for code in ["08000", "08003", "08006", "57P01", "57P02", "57P03"] {
            assert!(server_error(code).is_transient(), "{code}");
        }
    }

    #[test]
    fn statement_sqlstates_are_not_transient() {
        // unique violation, undefined table, query canceled
        for code in ["23505", "42P01", "57014"] {
            assert!(!server_error(code).is_transient(), "{code}");
        }
    }

    #[test]
    fn domain_errors_are_not_transient() {
        assert!(!Error::NotFound("task t1".into()).is_transient());
        assert!(!Error::Validation("empty sku".into()).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(
            !Error::InvalidTransition {
                from: "DONE".into(),
                to: "IN_PROGRESS".into()
            }
            .is_transient()
        );
    }
}
