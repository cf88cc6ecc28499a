//! Error types for client operations.

use std::{error, fmt, io, result};

/// The error enum for all client operations.
#[derive(Debug)]
pub enum Error {
    /// I/O operation failed; the inner error carries the `errno` description.
    IoError(io::Error),
    /// The server closed the connection mid-exchange.
    EofError,
    /// A malformed frame, unexpected opcode, or truncated document stream
    /// was received from the server.
    ResponseError(String),
    /// An operation was attempted in a state that cannot support it.
    OperationError(String),
    /// An invalid argument was supplied by the caller.
    ArgumentError(String),
    /// The server cursor referenced by a get-more request no longer exists.
    CursorNotFoundError,
    /// A document could not be serialized.
    EncoderError(bson::EncoderError),
    /// A document could not be deserialized.
    DecoderError(bson::DecoderError),
}

/// The result type for all client operations.
pub type Result<T> = result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<bson::EncoderError> for Error {
    fn from(err: bson::EncoderError) -> Error {
        Error::EncoderError(err)
    }
}

impl From<bson::DecoderError> for Error {
    fn from(err: bson::DecoderError) -> Error {
        Error::DecoderError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IoError(ref inner) => inner.fmt(fmt),
            Error::EofError => write!(fmt, "server closed the connection"),
            Error::ResponseError(ref inner) => inner.fmt(fmt),
            Error::OperationError(ref inner) => inner.fmt(fmt),
            Error::ArgumentError(ref inner) => inner.fmt(fmt),
            Error::CursorNotFoundError => write!(fmt, "no such cursor"),
            Error::EncoderError(ref inner) => inner.fmt(fmt),
            Error::DecoderError(ref inner) => inner.fmt(fmt),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref inner) => Some(inner),
            Error::EncoderError(ref inner) => Some(inner),
            Error::DecoderError(ref inner) => Some(inner),
            Error::EofError
            | Error::ResponseError(_)
            | Error::OperationError(_)
            | Error::ArgumentError(_)
            | Error::CursorNotFoundError => None,
        }
    }
}
