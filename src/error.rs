//! Error types for the transfer layer
//!
//! `TransferError` covers every failure a fetch or store operation can report.
//! [`TransferError::kind`] sorts them into the categories callers act on:
//! configuration and capability problems are never worth retrying, transient
//! ones usually are, integrity failures mean the bytes on hand are unusable.

use thiserror::Error;

use crate::context::ContextError;

/// Failures detected by the streaming copy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Response exceeded maximum size of {max} bytes at offset {offset}")]
    SizeExceeded { offset: u64, max: u64 },

    #[error("Truncated download: expected {expected} bytes, received {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Partial write: wrote {written} of {expected} bytes")]
    PartialWrite { expected: usize, written: usize },

    #[error("Unexpected EOF at offset {offset} (connection closed)")]
    UnexpectedEof { offset: u64 },
}

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad URL, disallowed scheme, malformed auth configuration
    Configuration,
    /// Backend lacks the requested feature
    Capability,
    /// Rate limiting, connection resets, mid-stream I/O
    Transient,
    /// Size/length/write verification failed
    Integrity,
    /// Caller's context was cancelled or timed out
    Context,
    /// The remote side answered with a definitive failure
    Remote,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Scheme '{0}' is not allowed for this request")]
    SchemeNotAllowed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Could not connect: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub(crate) fn invalid_url(url: &str, reason: impl std::fmt::Display) -> Self {
        TransferError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidUrl { .. }
            | TransferError::SchemeNotAllowed(_)
            | TransferError::InvalidConfig(_) => ErrorKind::Configuration,
            TransferError::NotSupported(_) => ErrorKind::Capability,
            TransferError::HttpStatus { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            TransferError::HttpStatus { .. }
            | TransferError::AuthenticationFailed(_)
            | TransferError::NotFound(_)
            | TransferError::AlreadyExists(_)
            | TransferError::Parse(_) => ErrorKind::Remote,
            TransferError::ConnectionFailed(_)
            | TransferError::Network(_)
            | TransferError::TransferFailed(_)
            | TransferError::Io(_) => ErrorKind::Transient,
            TransferError::Integrity(_) => ErrorKind::Integrity,
            TransferError::Context(_) => ErrorKind::Context,
        }
    }

    /// Whether repeating the same call could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP-equivalent status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::HttpStatus { status, .. } => Some(*status),
            TransferError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true for the configuration, capability and context failures that
    /// are surfaced to callers directly instead of being recorded on a fetch result
    pub fn is_fatal_to_caller(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Capability | ErrorKind::Context
        )
    }
}
