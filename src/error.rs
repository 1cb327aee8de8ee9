//! Error taxonomy
//!
//! No error here is fatal. The worst outcome of any failure is a forced
//! return to suggestion mode with a human-visible reason.

use std::time::Duration;
use thiserror::Error;

/// Platform element lookup and dispatch failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Input box not found within {0:?}")]
    InputNotFound(Duration),
    #[error("Send button not found within {0:?}")]
    SendButtonNotFound(Duration),
    #[error("Send interrupted before submission")]
    Interrupted,
    #[error("Platform dispatch failed: {0}")]
    Dispatch(String),
}

/// Response generator failures. Never retried within one turn.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Generator timed out after {0:?}")]
    Timeout(Duration),
    #[error("Generator call cancelled")]
    Cancelled,
    #[error("Generator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Generator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Malformed generator response: {0}")]
    Malformed(String),
    #[error("Invalid generator request: {0}")]
    InvalidRequest(#[from] ContextError),
}

/// Conversation context rejected before a generator call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Conversation context is empty")]
    Empty,
    #[error("Conversation context has {0} messages (max 50)")]
    TooLong(usize),
}

/// Persistence failures. Best effort: logged, never blocking.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Rejected mode transitions and invalid goal definitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Autonomous mode requires an active goal")]
    NoActiveGoal,
    #[error("Goal description required")]
    MissingDescription,
    #[error("max_turns must be positive")]
    InvalidMaxTurns,
    #[error("min_confidence must be within 0.0..=1.0, got {0}")]
    InvalidConfidence(String),
    #[error("Rating must be within 1..=5, got {0}")]
    InvalidRating(u8),
}

/// Umbrella error for orchestration steps
#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
