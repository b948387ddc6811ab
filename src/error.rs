use thiserror::Error;

/// Main error type for the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Coordination store errors (fatal inside supervision loops)
    #[error("Coordination store unavailable: {0}")]
    Store(String),

    // Catalog / dispatch errors
    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("No component id given (use --component or COMPONENT_ID)")]
    MissingComponentId,

    #[error("Component registered twice: {0}")]
    DuplicateComponent(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SchedulerError
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Whether this error means the coordination store itself failed.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(_) | SchedulerError::Database(_) | SchedulerError::Migration(_)
        )
    }
}
