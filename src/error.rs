//! Crate-wide error types.

/// A raftkv error. The replica itself treats nothing as fatal (protocol
/// failures resolve to protocol outcomes), so these surface configuration
/// problems, transport faults, and undecodable data.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid data, e.g. an undecodable datagram.
    InvalidData(String),
    /// Invalid user input, e.g. a malformed command-line argument.
    InvalidInput(String),
    /// An IO error, e.g. a socket failure.
    IO(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidData via format!(), and returns it as a
/// Result::Err.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { Err($crate::error::Error::InvalidData(format!($($args)*))) };
}

/// Constructs an Error::InvalidInput via format!(), and returns it as a
/// Result::Err.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { Err($crate::error::Error::InvalidInput(format!($($args)*))) };
}

/// A raftkv result.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<crossbeam::channel::SendError<T>> for Error {
    fn from(err: crossbeam::channel::SendError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<log::ParseLevelError> for Error {
    fn from(err: log::ParseLevelError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::InvalidInput(err.to_string())
    }
}
