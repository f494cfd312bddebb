//! Error types for Boardsync.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Credential, secret, or session failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Network-level failure (connect, reset, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote API answered with a non-2xx status.
    #[error("Fetch error: HTTP {status} from {url}")]
    Fetch { status: u16, url: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Storage not found: {0}")]
    StorageNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::NotFound(_) => "not_found",
            Error::Transport(_) => "transport",
            Error::Fetch { .. } => "fetch",
            Error::Decode(_) => "decode",
            Error::Validation(_) => "validation",
            Error::StorageConflict(_) => "storage_conflict",
            Error::StorageNotFound(_) => "storage_not_found",
            Error::Storage(_) => "storage",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
