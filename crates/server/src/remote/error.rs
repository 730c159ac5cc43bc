use std::time::Duration;
use thiserror::Error;

use crate::db;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("SSH connection failed: {0}")]
    Connect(String),
    #[error("Remote command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("SSH session error: {0}")]
    Session(String),
    #[error("Remote command exited with status {status}: {message}")]
    CommandFailed { status: i32, message: String },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Store error: {0}")]
    Store(#[from] db::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RemoteError {
    /// Whether the host could not be reached in time or refused the login.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Connect(_) | RemoteError::CommandTimeout(_))
    }
}
