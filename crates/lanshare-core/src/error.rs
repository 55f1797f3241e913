//! Error types for lanshare.
//!
//! This module provides a unified error type for all lanshare operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for lanshare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for lanshare.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request shape (E101)
    #[error("invalid parameters: {0}")]
    InvalidArgument(String),

    /// Unknown, finalized or expired upload session (E102)
    #[error("upload session '{0}' not found")]
    SessionNotFound(String),

    /// Completion requested before every chunk arrived (E103)
    #[error("incomplete chunks: {uploaded} of {total} uploaded")]
    IncompleteUpload {
        /// Chunks admitted so far
        uploaded: u32,
        /// Chunks expected
        total: u32,
    },

    /// Assembled file does not match the digest declared at init (E104)
    #[error("integrity check failed for '{file}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Requested file name
        file: String,
        /// Digest declared by the client
        expected: String,
        /// Digest of the staged artifact
        actual: String,
    },

    /// A ledger record with this id is already present
    #[error("upload session '{0}' already exists")]
    SessionExists(String),

    /// Ledger record on disk could not be decoded
    #[error("corrupt ledger record '{id}': {reason}")]
    CorruptRecord {
        /// Session id of the record
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Another process holds the upload storage
    #[error("upload storage at {0} is in use by another lanshare process")]
    StorageLocked(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Server could not bind or serve
    #[error("server error: {0}")]
    ServerError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument(_) => Some("E101"),
            Self::SessionNotFound(_) => Some("E102"),
            Self::IncompleteUpload { .. } => Some("E103"),
            Self::IntegrityMismatch { .. } => Some("E104"),
            _ => None,
        }
    }

    /// Returns whether the caller can make progress by retrying.
    ///
    /// An incomplete upload is the steady state mid-transfer: the caller
    /// resubmits the missing chunks and asks again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::IncompleteUpload { .. })
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::SessionNotFound(_) => {
                Some("The session expired or was already finalized; start the upload again.")
            }
            Self::IncompleteUpload { .. } => {
                Some("Ask for the missing chunks, resend them, then complete again.")
            }
            Self::IntegrityMismatch { .. } => {
                Some("The uploaded bytes differ from the declared hash; restart the upload.")
            }
            Self::StorageLocked(_) => Some(
                "A running `lanshare serve` owns this directory and sweeps it every \
                 `upload.sweep_interval`; stop the server to sweep by hand.",
            ),
            Self::ConfigError(_) | Self::InvalidConfig { .. } => {
                Some("Check the configuration file or run:\n  lanshare config init")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::invalid("x").code(), Some("E101"));
        assert_eq!(Error::SessionNotFound("a".into()).code(), Some("E102"));
        assert_eq!(
            Error::IncompleteUpload {
                uploaded: 1,
                total: 3
            }
            .code(),
            Some("E103")
        );
        assert_eq!(Error::Internal("x".into()).code(), None);
    }

    #[test]
    fn test_incomplete_is_recoverable() {
        let err = Error::IncompleteUpload {
            uploaded: 2,
            total: 5,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("2 of 5"));
        assert!(!Error::SessionNotFound("x".into()).is_recoverable());
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::SessionNotFound("x".into()).suggestion().is_some());
        assert!(Error::StorageLocked("/tmp".into()).suggestion().is_some());
        assert!(Error::Internal("x".into()).suggestion().is_none());
    }
}
