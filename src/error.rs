use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("invalid argument: {_0}")]
    Usage(#[error(not(source))] String),
    #[display("station operation failed")]
    Station,
    #[display("could not write output")]
    Output,
    #[display("could not wait for shutdown signal")]
    Signal,
}
