//! Error types for Postbox
//!
//! Defines a crate-level error enum aggregating the failure modes of the
//! mailbox primitives. Uses thiserror for ergonomic error handling.

use crate::mailbox::MailboxError;
use thiserror::Error;

/// Result type alias for Postbox operations
pub type Result<T> = std::result::Result<T, PostboxError>;

/// Crate-level error type for Postbox operations
#[derive(Error, Debug)]
pub enum PostboxError {
    /// Mailbox protocol errors (closed, forwarding, type mismatch, ...)
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// I/O errors (watch sinks)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
