//! Sync Error Types

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Polling was started outside of a Tokio runtime.
    #[display("no async runtime to poll on")]
    NoRuntime,
    /// A poll interval of zero was configured.
    #[display("{_0} must be greater than zero")]
    ZeroInterval(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
