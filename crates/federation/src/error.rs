//! Federation Error Types
//!
//! Only problems with the *request* surface here: a malformed identifier, an
//! unknown source named by a write, a missing entity. A source that fails
//! while answering a federated read is logged and left out of the result
//! instead.

use derive_more::{Display, Error};

/// A federation error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for federation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A composite identifier without a delimiter.
    #[display("malformed composite id: {_0}")]
    MalformedId(#[error(not(source))] String),
    /// A filter value outside the recognised set.
    #[display("invalid filter value: {_0}")]
    InvalidFilter(#[error(not(source))] String),
    /// No valid source answers to this alias.
    #[display("unknown source: {_0}")]
    UnknownSource(#[error(not(source))] String),
    /// The requested path or entity does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The configuration handed to the station was rejected.
    #[display("invalid configuration")]
    Config,
    #[display("source error")]
    Source,
    #[display("cache error")]
    Cache,
    #[display("sync error")]
    Sync,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source)
    }
}
