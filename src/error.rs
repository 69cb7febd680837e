use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the status database")]
    Database,
    #[display("could not open storage for {_0}")]
    Storage(#[error(not(source))] String),
    /// The configuration asks for a feature this build doesn't have.
    #[display("target {_0} needs the {_1} feature, which this build lacks")]
    Unsupported(#[error(not(source))] String, #[error(not(source))] &'static str),
    #[display("could not access {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
}
