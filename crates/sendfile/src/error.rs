//! Error types for sendfile operations.

use std::io;
use std::path::PathBuf;

/// Terminal outcome of a failed sendfile operation.
///
/// Every variant ends the transfer. The byte count delivered alongside the
/// error in the completion callback is the number of bytes the socket had
/// accepted before the failure.
#[derive(Debug, thiserror::Error)]
pub enum SendFileError {
    /// The socket could not be placed into non-blocking mode.
    #[error("failed to put socket into non-blocking mode: {0}")]
    ModeSwitchFailed(#[source] io::Error),

    /// The transfer syscall failed with something other than would-block.
    #[error("file-to-socket transfer failed: {0}")]
    TransferFailed(#[source] io::Error),

    /// Waiting for the socket to become writable failed.
    #[error("waiting for socket writability failed: {0}")]
    WaitFailed(#[source] io::Error),

    /// The time budget elapsed before every byte was sent.
    #[error("sendfile deadline exceeded")]
    DeadlineExceeded,

    /// The owner of the operation cancelled it (for example, the connection
    /// was closed) before it completed.
    #[error("sendfile operation cancelled")]
    Cancelled,
}

impl SendFileError {
    /// Returns the underlying OS error, if the failure carries one.
    #[must_use]
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::ModeSwitchFailed(err) | Self::TransferFailed(err) | Self::WaitFailed(err) => {
                Some(err)
            }
            Self::DeadlineExceeded | Self::Cancelled => None,
        }
    }

    /// Returns `true` when the operation ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

/// Error produced while building [`SendFileOptions`](crate::SendFileOptions).
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// Opening the source file failed.
    #[error("failed to open {path}: {source}")]
    Open {
        /// The path that could not be opened.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Querying the size or modification time of the source file failed.
    #[error("failed to read metadata of {path}: {source}")]
    Metadata {
        /// The path (or fd description) whose metadata was requested.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The requested offset lies past the end of the file.
    #[error("offset {offset} is beyond the end of the file ({file_size} bytes)")]
    InvalidOffset {
        /// Requested starting offset.
        offset: u64,
        /// Size of the file in bytes.
        file_size: u64,
    },
}
