//! Zero-copy file-to-socket transfer using the `sendfile` syscall.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use super::{CopyStrategy, Transport};

/// Copy strategy for plain stream sockets.
///
/// On Linux each attempt is a single `sendfile(2)` call with an explicit
/// offset, so the file's own cursor is never moved. Elsewhere the same
/// contract is met with `pread` into a scratch buffer followed by `write`.
#[derive(Debug, Default)]
pub struct ZeroCopy {
    #[cfg(not(target_os = "linux"))]
    scratch: Vec<u8>,
}

impl<S: Transport + AsRawFd> CopyStrategy<S> for ZeroCopy {
    #[cfg(target_os = "linux")]
    fn for_chunk_size(_chunk_size: u64) -> Self {
        Self {}
    }

    #[cfg(not(target_os = "linux"))]
    fn for_chunk_size(chunk_size: u64) -> Self {
        let len = chunk_size.min(super::MAX_BUFFER_SIZE as u64) as usize;
        Self {
            scratch: vec![0u8; len],
        }
    }

    fn attempt(
        &mut self,
        socket: &S,
        file: &File,
        offset: &mut u64,
        max_bytes: usize,
    ) -> io::Result<usize> {
        let socket_fd = socket.as_raw_fd();
        // A zero-byte copy must surface as would-block inside `try_io`, or the
        // reactor keeps the socket marked writable and the next wait never
        // parks.
        socket.try_write_with(|| match self.copy_chunk(socket_fd, file, offset, max_bytes) {
            Ok(0) if max_bytes > 0 => Err(io::ErrorKind::WouldBlock.into()),
            other => other,
        })
    }
}

impl ZeroCopy {
    #[cfg(target_os = "linux")]
    #[allow(clippy::unused_self, clippy::needless_pass_by_ref_mut)]
    fn copy_chunk(
        &mut self,
        socket_fd: RawFd,
        file: &File,
        offset: &mut u64,
        count: usize,
    ) -> io::Result<usize> {
        sendfile_at(socket_fd, file.as_raw_fd(), offset, count)
    }

    #[cfg(not(target_os = "linux"))]
    fn copy_chunk(
        &mut self,
        socket_fd: RawFd,
        file: &File,
        offset: &mut u64,
        count: usize,
    ) -> io::Result<usize> {
        pread_then_write(socket_fd, file, offset, count, &mut self.scratch)
    }
}

/// Issues one `sendfile` call for at most `count` bytes at `*offset`.
///
/// On success `*offset` is advanced by the kernel-reported byte count.
#[cfg(target_os = "linux")]
fn sendfile_at(
    socket_fd: RawFd,
    file_fd: RawFd,
    offset: &mut u64,
    count: usize,
) -> io::Result<usize> {
    let mut off = libc::off_t::try_from(*offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset out of range"))?;
    // SAFETY: both descriptors are borrowed from live objects for the
    // duration of the call and `off` is a valid, exclusively borrowed local.
    let sent = unsafe { libc::sendfile(socket_fd, file_fd, &mut off, count) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    *offset = off as u64;
    Ok(sent as usize)
}

/// Fallback: positional read into `scratch`, then one `write` to the socket.
///
/// Bytes read but not accepted by the socket are simply read again on the
/// next attempt, so `*offset` only ever advances by what was written.
#[cfg(not(target_os = "linux"))]
fn pread_then_write(
    socket_fd: RawFd,
    file: &File,
    offset: &mut u64,
    count: usize,
    scratch: &mut [u8],
) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let want = count.min(scratch.len());
    let read = file.read_at(&mut scratch[..want], *offset)?;
    if read == 0 {
        return Ok(0);
    }
    // SAFETY: scratch[..read] is initialised and socket_fd is borrowed from
    // a live socket for the duration of the call.
    let written = unsafe { libc::write(socket_fd, scratch.as_ptr().cast::<libc::c_void>(), read) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    *offset += written as u64;
    Ok(written as usize)
}
