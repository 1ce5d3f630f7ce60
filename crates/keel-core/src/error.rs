use thiserror::Error;

/// Core error type for keel operations.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Failed to execute '{name}': {message}")]
    Execution { name: String, message: String },

    #[error("Conflict: '{0}' is already recorded as applied")]
    Conflict(String),

    #[error("Not implemented: {0}")]
    Unsupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl KeelError {
    /// Build an execution error for the named change-set or seed file.
    pub fn execution(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KeelError::Execution {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Name of the change-set or seed file this error is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            KeelError::Execution { name, .. } => Some(name),
            KeelError::Conflict(name) => Some(name),
            _ => None,
        }
    }
}

/// Result type alias using KeelError.
pub type Result<T> = std::result::Result<T, KeelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_names_change_set() {
        let err = KeelError::execution("002_add_posts.sql", "syntax error at or near \"TABL\"");
        assert_eq!(err.subject(), Some("002_add_posts.sql"));
        assert!(err.to_string().contains("002_add_posts.sql"));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_conflict_subject() {
        let err = KeelError::Conflict("001_init.sql".into());
        assert_eq!(err.subject(), Some("001_init.sql"));
        assert!(KeelError::Schema("boom".into()).subject().is_none());
    }
}
