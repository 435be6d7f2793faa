use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Errors raised by the SAM transport adapter.
#[derive(Debug)]
pub enum Error {
    /// Socket-level failure talking to the bridge.
    Io(io::Error),

    /// The bridge answered something the client cannot make sense of.
    Protocol(String),

    /// The bridge rejected a command (`RESULT` other than `OK`).
    Rejected { result: String, message: String },

    /// No live session to send through.
    TransportDown,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "sam io error: {}", err),
            Error::Protocol(reason) => write!(f, "sam protocol error: {}", reason),
            Error::Rejected { result, message } if message.is_empty() => {
                write!(f, "sam bridge rejected command: {}", result)
            }
            Error::Rejected { result, message } => {
                write!(f, "sam bridge rejected command: {} ({})", result, message)
            }
            Error::TransportDown => write!(f, "sam transport is down"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}
