//! Error types for the Box client

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Box client error type
#[derive(Error, Debug)]
pub enum BoxError {
    #[error("Failed to read Box settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid Box settings file {path}: {message}")]
    Settings { path: PathBuf, message: String },

    #[error("Box authentication setup failed: {0}")]
    Auth(String),

    #[error("Failed to read upload source {path}: {source}")]
    UploadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Box API returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected Box response: {0}")]
    Response(String),
}

impl BoxError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, rate limiting and server errors are transient.
    /// Everything else (bad credentials, missing folder, unreadable file) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            BoxError::Request(err) => err.status().map_or(true, |status| {
                status.is_server_error() || status.as_u16() == 429
            }),
            BoxError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The API rejected an upload because the name is already taken in the folder.
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, BoxError::Api { status: 409, code, .. } if code == "item_name_in_use")
    }

    /// The collaboration already exists.
    pub fn is_already_collaborator(&self) -> bool {
        matches!(self, BoxError::Api { status: 400, code, .. } if code == "user_already_collaborator")
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BoxError>;
