//! Error types for the expense event publisher
//!
//! Publishing never surfaces errors to callers; these types cover startup and
//! configuration, where a failure is meaningful to the hosting process.

use thiserror::Error;

/// Main error type for messaging operations
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Topology error: {0}")]
    Topology(#[from] crate::topology::TopologyError),

    #[error("Broker connection sequence already started")]
    AlreadyStarted,

    #[error("Startup task failed: {message}")]
    StartupTask { message: String },
}

impl MessagingError {
    /// Whether the hosting process should treat this as a deployment error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MessagingError::Config(_) | MessagingError::Topology(_)
        )
    }
}

/// Render an error and its source chain on one line
pub fn display_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

/// Result type for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::topology::TopologyError;
    use crate::transport::TransportError;

    #[test]
    fn test_display_chain_includes_sources() {
        let error = TransportError::connection("connection refused (os error 111)");
        assert_eq!(
            display_chain(&error),
            "Connection failed: connection refused (os error 111)"
        );
    }

    #[test]
    fn test_display_chain_skips_repeated_text() {
        let error = MessagingError::from(ConfigError::InvalidConfig("bad".to_string()));
        assert_eq!(
            display_chain(&error),
            "Configuration error: Invalid configuration: bad"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let conflict = MessagingError::from(TopologyError::Conflict {
            name: "expenses_exchange".to_string(),
            detail: "kind mismatch".to_string(),
        });
        assert!(conflict.is_fatal());
        assert!(!MessagingError::AlreadyStarted.is_fatal());
        assert!(!MessagingError::StartupTask {
            message: "join error".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            MessagingError::AlreadyStarted,
            MessagingError::StartupTask {
                message: "panicked".to_string(),
            },
            MessagingError::from(ConfigError::InvalidConfig("nope".to_string())),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
