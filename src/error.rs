//! Core error taxonomy
//!
//! Recoverable conditions are surfaced to callers; the scoring path never
//! errors and the notification pipeline never dies on a failed write.

use thiserror::Error;

/// Errors surfaced by the studylink core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or missing required fields, rejected at the boundary
    #[error("validation failed: {0}")]
    Validation(String),

    /// Session is full; the caller decides the UX
    #[error("session {session_id} is at capacity ({capacity})")]
    CapacityExceeded { session_id: String, capacity: usize },

    /// Unknown session, participant, or notification id
    #[error("not found: {0}")]
    NotFound(String),

    /// Store read or write failure
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoreError {
    /// Wrap a store-layer failure
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
