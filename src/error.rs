//! Error types for imap-backup
//!
//! The taxonomy mirrors how the pipeline reacts to a failure:
//! - [`Error`] covers everything that aborts a run (configuration, session setup,
//!   folder listing, archive I/O, cancellation)
//! - [`FetchError`] covers a failed body fetch inside a single folder, which the
//!   download workers log and recover from

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for imap-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for imap-backup
///
/// Every variant returned from [`crate::Backup::run`] is fatal for the run. Per-folder
/// problems never surface here; they are logged by the worker that hit them.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "username")
        key: Option<String>,
    },

    /// Could not reach the server or negotiate TLS
    #[error("failed to connect to {address}: {reason}")]
    Connect {
        /// The address that was dialed (host:port)
        address: String,
        /// Underlying cause
        reason: String,
        /// Whether the failure looks transient (refused, reset, timed out)
        transient: bool,
    },

    /// The server rejected the credentials
    #[error("authentication failed for {username}: {reason}")]
    Auth {
        /// The user name that was rejected
        username: String,
        /// Server response text
        reason: String,
    },

    /// IMAP protocol error outside of a body fetch (LIST, SELECT, LOGOUT)
    #[error("IMAP error: {0}")]
    Imap(String),

    /// An established session lost its connection
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Archive container could not be created, appended to or finalized
    #[error("archive error for {path}: {reason}")]
    Archive {
        /// The archive path on disk
        path: PathBuf,
        /// The reason the operation failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before the pipeline drained
    #[error("backup cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Whether this error ends the run on its own rather than as a consequence of
    /// another task failing first.
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}

/// Failure of a streamed body fetch
///
/// The two variants are handled identically by the workers (log and move on to the
/// next folder) but are reported differently so the log says whether the session
/// dropped or the server refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The session was reset or the connection was lost mid-fetch
    #[error("fetch command aborted")]
    Aborted,

    /// The server answered the FETCH with NO or BAD
    #[error("fetch error: {0}")]
    Server(String),
}

impl From<async_imap::error::Error> for FetchError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;
        match err {
            ImapError::ConnectionLost | ImapError::Io(_) => FetchError::Aborted,
            ImapError::No(info) | ImapError::Bad(info) => FetchError::Server(info),
            other => FetchError::Server(other.to_string()),
        }
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;
        match err {
            ImapError::ConnectionLost => Error::Disconnected("connection closed by server".into()),
            ImapError::Io(e) => Error::Disconnected(e.to_string()),
            other => Error::Imap(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            other => Error::Other(format!("zip: {}", other)),
        }
    }
}
