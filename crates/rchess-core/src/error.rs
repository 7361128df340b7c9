//! Failures that end a session before or while it runs.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open session pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("session I/O failed: {0}")]
    Io(#[source] io::Error),
}

impl SessionError {
    /// Non-zero status reported to the caller of a session.
    pub fn status(&self) -> i32 {
        match self {
            SessionError::Pipe(_) => 1,
            SessionError::Spawn(_) => 2,
            SessionError::Io(_) => 3,
        }
    }
}

/// 0 for a session that ended normally, the error's status otherwise.
pub fn exit_status(result: &Result<(), SessionError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.status(),
    }
}
