//! Error types for the BlockDb storage engine.

use std::fmt;
use std::io;

/// The result type used throughout BlockDb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for BlockDb operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// Data corruption was detected (bad magic, bad file signature,
    /// malformed index or entry framing).
    Corruption(String),

    /// A block digest did not match the stored one.
    ChecksumMismatch {
        /// The digest stored in the block envelope, hex-encoded.
        expected: String,
        /// The digest recomputed over the decoded bytes, hex-encoded.
        actual: String,
    },

    /// A block decompressed to a different length than recorded.
    SizeMismatch {
        /// The plaintext length recorded in the block envelope.
        expected: usize,
        /// The actual decompressed length.
        actual: usize,
    },

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// The engine is in an invalid state.
    InvalidState(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Corruption(msg) => write!(f, "Data corruption: {}", msg),
            Error::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: expected {}, got {}", expected, actual)
            }
            Error::SizeMismatch { expected, actual } => {
                write!(f, "Invalid decompression size: expected {}, got {}", expected, actual)
            }
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
