//! Transfer descriptors for sendfile operations.
//!
//! A [`SendFileOptions`] value names the file to stream, the byte range to
//! send, the per-syscall chunk size and the overall time budget. It is built
//! once by the response layer and is immutable while an operation runs.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sendfile::SendFileOptions;
//!
//! # fn main() -> Result<(), sendfile::OptionsError> {
//! let options = SendFileOptions::open("index.html")?
//!     .offset_and_size(512, 4096)?
//!     .chunk_size(64 * 1024)
//!     .timelimit(Duration::from_secs(30));
//! assert_eq!(options.offset(), 512);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::OptionsError;

/// Default number of bytes attempted per syscall (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Upper bound for the per-syscall chunk size (1 GiB).
///
/// Linux `sendfile` transfers at most ~2GB per call; keeping chunks at 1 GiB
/// also bounds how long one connection can monopolise a worker.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Size and modification time of the file being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    size: u64,
    modified: Option<SystemTime>,
}

impl FileMeta {
    /// Creates metadata from explicit values.
    #[must_use]
    pub const fn new(size: u64, modified: Option<SystemTime>) -> Self {
        Self { size, modified }
    }

    /// Total size of the file in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Last modification time, when the platform reports one.
    #[must_use]
    pub const fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    fn of(file: &File, path: &Path) -> Result<Self, OptionsError> {
        let metadata = file.metadata().map_err(|source| OptionsError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Immutable description of one file-to-socket transfer.
///
/// The file handle is shared with the caller: the operation holds a clone of
/// the [`Arc`] only so the descriptor can never dangle, the caller remains the
/// owner of the underlying file.
#[derive(Debug, Clone)]
pub struct SendFileOptions {
    file: Arc<File>,
    meta: Option<FileMeta>,
    offset: u64,
    size: u64,
    chunk_size: u64,
    timelimit: Duration,
}

impl SendFileOptions {
    /// Opens `path` read-only and describes a transfer of the whole file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let (file, meta) = open_file(path)?;
        Ok(Self::with_meta(file, meta))
    }

    /// Describes a transfer of the whole of an already opened file.
    ///
    /// Only the file's metadata is queried; its cursor is left untouched
    /// because transfers always address the file by absolute offset.
    pub fn from_file(file: Arc<File>) -> Result<Self, OptionsError> {
        let meta = FileMeta::of(&file, &describe_fd(&file))?;
        Ok(Self::with_meta(file, meta))
    }

    /// Describes a transfer of `size` bytes from `offset` without consulting
    /// the file's metadata.
    ///
    /// The range is taken on trust. If the file is shorter than
    /// `offset + size`, a zero-copy transfer parks once the end of file is
    /// reached and finishes with
    /// [`DeadlineExceeded`](crate::SendFileError::DeadlineExceeded) when the
    /// time budget runs out; a buffered transfer fails with
    /// [`TransferFailed`](crate::SendFileError::TransferFailed).
    #[must_use]
    pub fn from_raw_parts(file: Arc<File>, offset: u64, size: u64) -> Self {
        Self {
            file,
            meta: None,
            offset,
            size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timelimit: Duration::MAX,
        }
    }

    fn with_meta(file: Arc<File>, meta: FileMeta) -> Self {
        Self {
            file,
            meta: Some(meta),
            offset: 0,
            size: meta.size(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timelimit: Duration::MAX,
        }
    }

    /// Selects the byte range `[offset, offset + size)` to send.
    ///
    /// When the file size is known, `offset` must not exceed it and `size` is
    /// clamped to the bytes available after `offset`. Pass `u64::MAX` as
    /// `size` to send everything from `offset` to the end of the file.
    pub fn offset_and_size(mut self, offset: u64, size: u64) -> Result<Self, OptionsError> {
        if let Some(meta) = self.meta {
            if offset > meta.size() {
                return Err(OptionsError::InvalidOffset {
                    offset,
                    file_size: meta.size(),
                });
            }
            self.size = size.min(meta.size() - offset);
        } else {
            self.size = size;
        }
        self.offset = offset;
        Ok(self)
    }

    /// Sets the per-syscall chunk size.
    ///
    /// `0` is raised to `1`, values above [`MAX_CHUNK_SIZE`] are clamped.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Sets the time budget for the whole transfer.
    pub fn timelimit(mut self, timelimit: Duration) -> Self {
        self.timelimit = timelimit;
        self
    }

    /// Shared handle of the file being sent.
    #[must_use]
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    /// Metadata captured when the file was opened, if any.
    #[must_use]
    pub fn meta(&self) -> Option<FileMeta> {
        self.meta
    }

    /// Offset of the first byte to send.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes to send.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Maximum number of bytes attempted per syscall.
    #[must_use]
    pub fn chunk_len(&self) -> u64 {
        self.chunk_size
    }

    /// Time budget for the whole transfer.
    #[must_use]
    pub fn time_budget(&self) -> Duration {
        self.timelimit
    }
}

/// Opens `path` read-only and returns a shareable handle with its metadata.
///
/// Both failure kinds carry `path`.
pub fn open_file(path: impl AsRef<Path>) -> Result<(Arc<File>, FileMeta), OptionsError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| OptionsError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let meta = FileMeta::of(&file, path)?;
    Ok((Arc::new(file), meta))
}

fn describe_fd(file: &File) -> PathBuf {
    use std::os::fd::AsRawFd;
    PathBuf::from(format!("fd:{}", file.as_raw_fd()))
}
