//! Buffered read-then-write transfer for transports without `sendfile`.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use super::{CopyStrategy, Transport, TryWrite};

/// Largest chunk buffer a [`BufferedCopy`] allocates (256 KiB).
///
/// Chunk sizes above this are still honoured as a cap on how much one
/// attempt may send; they just take several reads to fill.
pub const MAX_BUFFER_SIZE: usize = 256 * 1024;

/// Copy strategy for transports that only accept byte slices.
///
/// File bytes are read positionally into one chunk buffer. Bytes the socket
/// did not accept stay buffered and are written first on the next attempt,
/// so the file is read exactly once and the socket-side offset advances only
/// by what was actually written.
#[derive(Debug)]
pub struct BufferedCopy {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl BufferedCopy {
    /// Number of bytes read from the file but not yet written to the socket.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.end - self.start
    }

    fn refill(&mut self, file: &File, offset: u64, max_bytes: usize) -> io::Result<()> {
        let want = max_bytes.min(self.buf.len());
        let read = loop {
            match file.read_at(&mut self.buf[..want], offset) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        };
        if read == 0 && want > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file ended before the requested range was sent",
            ));
        }
        self.start = 0;
        self.end = read;
        Ok(())
    }
}

impl<S: Transport + TryWrite> CopyStrategy<S> for BufferedCopy {
    fn for_chunk_size(chunk_size: u64) -> Self {
        let len = chunk_size.clamp(1, MAX_BUFFER_SIZE as u64) as usize;
        Self {
            buf: vec![0u8; len].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    fn attempt(
        &mut self,
        socket: &S,
        file: &File,
        offset: &mut u64,
        max_bytes: usize,
    ) -> io::Result<usize> {
        if self.pending() == 0 {
            self.refill(file, *offset, max_bytes)?;
        }
        let len = self.pending().min(max_bytes);
        let written = socket.try_write(&self.buf[self.start..self.start + len])?;
        self.start += written;
        *offset += written as u64;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Socket stub that accepts a scripted number of bytes per write.
    struct Trickle {
        accepts: Mutex<VecDeque<io::Result<usize>>>,
        received: Mutex<Vec<u8>>,
    }

    impl Trickle {
        fn new(accepts: Vec<io::Result<usize>>) -> Self {
            Self {
                accepts: Mutex::new(accepts.into()),
                received: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for Trickle {
        type Copy = BufferedCopy;

        fn ensure_nonblocking(&self) -> io::Result<()> {
            Ok(())
        }

        fn try_write_with<R>(&self, op: impl FnOnce() -> io::Result<R>) -> io::Result<R> {
            op()
        }

        fn writable(&self) -> impl Future<Output = io::Result<()>> + Send + '_ {
            std::future::ready(Ok(()))
        }
    }

    impl TryWrite for Trickle {
        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let accepted = self.accepts.lock().unwrap().pop_front().unwrap_or(Ok(buf.len()))?;
            let accepted = accepted.min(buf.len());
            self.received
                .lock()
                .unwrap()
                .extend_from_slice(&buf[..accepted]);
            Ok(accepted)
        }
    }

    fn source(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn strategy(chunk: u64) -> BufferedCopy {
        <BufferedCopy as CopyStrategy<Trickle>>::for_chunk_size(chunk)
    }

    #[test]
    fn test_partial_write_keeps_remainder_buffered() {
        let file = source(b"0123456789");
        let socket = Trickle::new(vec![Ok(3), Ok(7)]);
        let mut copy = strategy(16);
        let mut offset = 0;

        let first = copy.attempt(&socket, file.as_file(), &mut offset, 10).unwrap();
        assert_eq!(first, 3);
        assert_eq!(offset, 3);
        assert_eq!(copy.pending(), 7);

        let second = copy.attempt(&socket, file.as_file(), &mut offset, 7).unwrap();
        assert_eq!(second, 7);
        assert_eq!(offset, 10);
        assert_eq!(copy.pending(), 0);
        assert_eq!(*socket.received.lock().unwrap(), b"0123456789");
    }

    #[test]
    fn test_would_block_retains_buffered_bytes() {
        let file = source(b"abcdef");
        let socket = Trickle::new(vec![Err(io::ErrorKind::WouldBlock.into())]);
        let mut copy = strategy(4);
        let mut offset = 0;

        let error = copy.attempt(&socket, file.as_file(), &mut offset, 6).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(offset, 0);
        assert_eq!(copy.pending(), 4);

        let sent = copy.attempt(&socket, file.as_file(), &mut offset, 6).unwrap();
        assert_eq!(sent, 4);
        assert_eq!(*socket.received.lock().unwrap(), b"abcd");
    }

    #[test]
    fn test_reads_start_at_offset_and_respect_max_bytes() {
        let file = source(b"0123456789");
        let socket = Trickle::new(Vec::new());
        let mut copy = strategy(1024);
        let mut offset = 4;

        let sent = copy.attempt(&socket, file.as_file(), &mut offset, 3).unwrap();

        assert_eq!(sent, 3);
        assert_eq!(offset, 7);
        assert_eq!(*socket.received.lock().unwrap(), b"456");
    }

    #[test]
    fn test_short_file_is_unexpected_eof() {
        let file = source(b"xy");
        let socket = Trickle::new(Vec::new());
        let mut copy = strategy(8);
        let mut offset = 2;

        let error = copy.attempt(&socket, file.as_file(), &mut offset, 8).unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(offset, 2);
    }

    #[test]
    fn test_buffer_is_capped() {
        let copy = strategy(u64::MAX);
        assert_eq!(copy.buf.len(), MAX_BUFFER_SIZE);

        let tiny = strategy(0);
        assert_eq!(tiny.buf.len(), 1);
    }
}
