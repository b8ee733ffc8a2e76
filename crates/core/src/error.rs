//! Error taxonomy for the orchestrator core.
//!
//! Only configuration errors (and explicit cancellation) abort a bulk
//! run. Everything local to one task or one artifact is reported through
//! the event stream or logged and skipped, never propagated upward.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Missing or malformed configuration. Fatal: detected before any
    /// task is scheduled.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An input value failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The album store could not read or write a record.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An internal channel or task failed unexpectedly.
    #[error("Internal error: {0}")]
    Internal(String),
}
