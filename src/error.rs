//! Error types for mailflow.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while handing a message to a publish channel.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to encode message for channel {channel}: {reason}")]
    Encode { channel: String, reason: String },

    #[error("Send to channel {channel} failed: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Broker rejected message for channel {channel} with status {status}: {body}")]
    Rejected {
        channel: String,
        status: u16,
        body: String,
    },
}

/// Coarse classification of a [`MailError`], used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input failed a precondition. Client-fixable.
    Validation,
    /// The referenced mail id does not exist.
    NotFound,
    /// Store, broker, or timeout failure. Not retried by the pipeline.
    Technical,
}

/// Errors returned by the mail pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Mail {id} already exists")]
    Duplicate { id: String },

    #[error("Mail {id} not found")]
    NotFound { id: String },

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Duplicate { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Database(_) | Self::Publish(_) | Self::Timeout { .. } => ErrorKind::Technical,
        }
    }
}

impl From<DatabaseError> for MailError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { id, .. } => Self::NotFound { id },
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_not_found_maps_to_mail_not_found() {
        let err: MailError = DatabaseError::NotFound {
            entity: "mail".into(),
            id: "m-1".into(),
        }
        .into();
        assert!(matches!(err, MailError::NotFound { ref id } if id == "m-1"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn other_database_errors_are_technical() {
        let err: MailError = DatabaseError::Query("disk I/O error".into()).into();
        assert_eq!(err.kind(), ErrorKind::Technical);
    }

    #[test]
    fn duplicate_is_a_validation_error() {
        let err = MailError::Duplicate { id: "m-1".into() };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Mail m-1 already exists");
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = MailError::Timeout {
            operation: "publish",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.kind(), ErrorKind::Technical);
        assert!(err.to_string().starts_with("publish timed out"));
    }
}
