use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    /// Malformed input syntax. The message is a static description of the offending construct.
    Parse(&'static str),
    /// A recoverable data problem (e.g., a stream that fails to decode).
    Data(String),
    /// Invalid configuration or API use.
    Usage(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IO(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IO(err) => write!(f, "I/O error: {err}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Data(msg) => write!(f, "data error: {msg}"),
            Error::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None
        }
    }
}
