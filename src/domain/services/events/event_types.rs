//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | EventError              | Error types for configuration and dispatch        | error, from       |
// | ErrorCode               | Code handed to the error reporter                 | as_str            |
//--------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the event system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to publish an event through a handle whose bus is gone
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to process an event
    #[error("Failed to process event: {0}")]
    ProcessingError(String),

    /// A handler returned an error while handling an event
    #[error("Handler '{handler}' failed: {reason}")]
    HandlerFailed {
        handler: String,
        reason: String,
    },

    /// A handler panicked while handling an event
    #[error("Handler '{handler}' panicked: {message}")]
    HandlerPanicked {
        handler: String,
        message: String,
    },

    /// The bus configuration was rejected at construction
    #[error("Invalid event bus configuration: {0}")]
    InvalidConfig(String),
}

/// Type alias for Result with EventError
pub type EventResult<T> = Result<T, EventError>;

impl EventError {
    /// Shorthand for a handler to report a processing failure.
    pub fn processing(reason: impl Into<String>) -> Self {
        EventError::ProcessingError(reason.into())
    }

    /// Code forwarded to the error reporter for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EventError::PublishError(_) => ErrorCode::EventPublishFailed,
            EventError::ProcessingError(_) | EventError::HandlerFailed { .. } => {
                ErrorCode::EventHandlerFailed
            }
            EventError::HandlerPanicked { .. } => ErrorCode::EventHandlerPanicked,
            EventError::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }
}

/// Error codes understood by error reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    EventPublishFailed,
    EventHandlerFailed,
    EventHandlerPanicked,
    InvalidConfig,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EventPublishFailed => "EVENT_PUBLISH_FAILED",
            ErrorCode::EventHandlerFailed => "EVENT_HANDLER_ERROR",
            ErrorCode::EventHandlerPanicked => "EVENT_HANDLER_PANIC",
            ErrorCode::InvalidConfig => "EVENT_BUS_INVALID_CONFIG",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
