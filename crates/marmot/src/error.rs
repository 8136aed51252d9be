//! Error and status types for marmot storage operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for marmot operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Stream status carried by the binary codec layer.
///
/// The codec never returns `Result`; instead each reader and writer holds a
/// sticky status. Once a stream leaves [`Status::Ok`], every subsequent
/// operation is a no-op reporting the same status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// The stream is healthy.
    #[default]
    Ok,
    /// A read ran past the end of the stream.
    EndOfStream,
    /// The file does not exist. Benign for readers.
    NotFound,
    /// Any other filesystem or decoding failure.
    IoError,
    /// The stream has been closed (or was never opened).
    Closed,
}

/// The error type for vault and flush operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A codec stream left the healthy state.
    #[error("stream failure: {0:?}")]
    Stream(Status),

    /// Vault file header carries an unsupported version pair.
    #[error("invalid vault file header: version {major}.{minor}")]
    InvalidHeader {
        /// Major version byte found in the file.
        major: u8,
        /// Minor version byte found in the file.
        minor: u8,
    },
}
