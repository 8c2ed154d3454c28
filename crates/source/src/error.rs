//! Source Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Note that an *invalid* source (one that opens but lacks the expected
//! tables) is not an error: it is registered with `is_valid = false` so it
//! stays visible without taking part in queries.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for discovery and registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source file does not exist at open (or write) time.
    #[display("source not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Filesystem access failed for a reason other than absence.
    #[display("I/O error")]
    Io,
    /// Opening a connection or executing a statement failed.
    #[display("database error")]
    Database,
    /// An exclude pattern could not be compiled.
    #[display("invalid exclude pattern: {_0}")]
    Pattern(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Database)
    }
}
