//! Error types for tutor-engine

use thiserror::Error;

use crate::types::SuggestionId;

/// Error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Repository rejected the operation or could not be reached
    #[error("Repository error: {0}")]
    Repository(String),

    /// Quiz operation attempted before `initialize_session`
    #[error("Quiz session not initialized")]
    SessionNotInitialized,

    /// Quiz operation attempted on a completed session
    #[error("Quiz session already completed")]
    SessionCompleted,

    /// An answer was submitted with no question outstanding
    #[error("No question has been presented")]
    NoQuestionPresented,

    /// Suggestion id is not in the active list
    #[error("Suggestion not found: {0}")]
    SuggestionNotFound(SuggestionId),

    /// Telemetry collector has been shut down
    #[error("Telemetry collector is inactive")]
    CollectorInactive,

    /// Session actor task is gone
    #[error("Session actor stopped")]
    ActorStopped,

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
