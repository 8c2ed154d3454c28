//! Cache Error Types
//!
//! The cache itself cannot fail at runtime: a missing, expired or mistyped
//! entry is simply a miss. The only fallible step is turning a filter object
//! into a key.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The filters for an operation could not be serialized into a key.
    #[display("could not build cache key for `{_0}`")]
    Key(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
