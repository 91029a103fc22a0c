//! Socket capabilities used by the transfer runner.
//!
//! A [`Transport`] names, through its associated [`Transport::Copy`] type,
//! the one [`CopyStrategy`] that moves bytes from the file to the socket:
//!
//! - [`ZeroCopy`] for plain stream sockets, using `sendfile(2)` so bytes go
//!   from the page cache to the socket buffer without a userspace copy.
//! - [`BufferedCopy`] for any transport that can only accept byte slices
//!   (encrypted or virtual streams), reading the file positionally into a
//!   chunk buffer and writing from there.
//!
//! The choice is made by the type system when the runner is instantiated and
//! never changes for the lifetime of an operation.
//!
//! # Platform Support
//!
//! - **Linux**: [`ZeroCopy`] issues `sendfile` directly
//! - **Other Unix**: [`ZeroCopy`] falls back to `pread` + `write` with
//!   identical offset accounting

use std::fs::File;
use std::future::Future;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use tokio::io::Interest;
use tokio::net::{TcpStream, UnixStream};

mod buffered;
mod zero_copy;

pub use buffered::{BufferedCopy, MAX_BUFFER_SIZE};
pub use zero_copy::ZeroCopy;

/// A connected stream socket the runner can push file bytes into.
pub trait Transport: Send + Sync + 'static {
    /// Strategy used to move one chunk from the file into this transport.
    type Copy: CopyStrategy<Self>;

    /// Puts the socket into non-blocking mode if it is not already.
    fn ensure_nonblocking(&self) -> io::Result<()>;

    /// Runs a write-side syscall against the socket.
    ///
    /// A `WouldBlock` result from `op` must clear any cached write readiness
    /// so the next [`writable`](Self::writable) wait really waits.
    fn try_write_with<R>(&self, op: impl FnOnce() -> io::Result<R>) -> io::Result<R>;

    /// Resolves once the socket can accept more bytes, or fails when the
    /// socket is in an error state.
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send + '_;
}

/// Non-blocking write of a byte slice, used by [`BufferedCopy`].
pub trait TryWrite {
    /// Writes as much of `buf` as the socket accepts without blocking.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// One way of moving bytes from a file into a transport.
pub trait CopyStrategy<S: ?Sized>: Send + 'static {
    /// Creates the per-operation strategy state.
    fn for_chunk_size(chunk_size: u64) -> Self;

    /// Makes exactly one attempt to send up to `max_bytes` starting at
    /// `offset`, advancing `offset` by the number of bytes the socket
    /// accepted and returning that number.
    fn attempt(
        &mut self,
        socket: &S,
        file: &File,
        offset: &mut u64,
        max_bytes: usize,
    ) -> io::Result<usize>;
}

/// Forces the buffered read-then-write path for a transport.
///
/// Useful for transports whose fd must not be written to behind their back
/// and for filesystems where `sendfile` is unavailable.
#[derive(Debug)]
pub struct Buffered<S>(S);

impl<S> Buffered<S> {
    /// Wraps `inner`.
    pub const fn new(inner: S) -> Self {
        Self(inner)
    }

    /// Returns the wrapped transport.
    pub const fn get_ref(&self) -> &S {
        &self.0
    }

    /// Unwraps the transport.
    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S: Transport + TryWrite> Transport for Buffered<S> {
    type Copy = BufferedCopy;

    fn ensure_nonblocking(&self) -> io::Result<()> {
        self.0.ensure_nonblocking()
    }

    fn try_write_with<R>(&self, op: impl FnOnce() -> io::Result<R>) -> io::Result<R> {
        self.0.try_write_with(op)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        self.0.writable()
    }
}

impl<S: TryWrite> TryWrite for Buffered<S> {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }
}

impl Transport for TcpStream {
    type Copy = ZeroCopy;

    fn ensure_nonblocking(&self) -> io::Result<()> {
        set_nonblocking(self.as_fd())
    }

    fn try_write_with<R>(&self, op: impl FnOnce() -> io::Result<R>) -> io::Result<R> {
        Self::try_io(self, Interest::WRITABLE, op)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        Self::writable(self)
    }
}

impl TryWrite for TcpStream {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        Self::try_write(self, buf)
    }
}

impl Transport for UnixStream {
    type Copy = ZeroCopy;

    fn ensure_nonblocking(&self) -> io::Result<()> {
        set_nonblocking(self.as_fd())
    }

    fn try_write_with<R>(&self, op: impl FnOnce() -> io::Result<R>) -> io::Result<R> {
        Self::try_io(self, Interest::WRITABLE, op)
    }

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        Self::writable(self)
    }
}

impl TryWrite for UnixStream {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        Self::try_write(self, buf)
    }
}

/// Sets `O_NONBLOCK` on `fd`, skipping the write when it is already set.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` comes from a live BorrowedFd.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: as above; only the status flags are changed.
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
