//! Error types for AllAboutMe automation.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AllAboutMeError>;

#[derive(Debug, Error)]
pub enum AllAboutMeError {
    /// Operator misconfiguration (bad setting value, invalid window, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Notification channel delivery failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Work request could not be handed to the worker queue.
    #[error("Queue error: {0}")]
    Queue(String),

    /// A collaborator (script writer, renderer, publisher) failed.
    #[error("Worker error: {0}")]
    Worker(String),

    /// A post is in a shape the dispatcher cannot advance.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AllAboutMeError {
    /// Configuration errors are fatal to the invocation that hit them.
    pub fn is_config(&self) -> bool {
        matches!(self, AllAboutMeError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = AllAboutMeError::Database("Insert post: disk full".into());
        assert_eq!(err.to_string(), "Database error: Insert post: disk full");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AllAboutMeError = io.into();
        assert!(matches!(err, AllAboutMeError::Io(_)));
        assert!(!err.is_config());
        assert!(AllAboutMeError::Config("x".into()).is_config());
    }
}
