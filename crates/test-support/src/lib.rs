//! Shared fixtures for sendfile tests: patterned source files, connected
//! socket pairs and readers that drain a peer at a chosen pace.

use std::io::{self, Write};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream, UnixStream};

/// Deterministic content where byte `i` is `i % 251`.
///
/// 251 is prime, so any window of the file is distinguishable from a window
/// at a different offset.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Temporary file filled with [`patterned_bytes`], plus its content.
pub fn patterned_file(len: usize) -> io::Result<(NamedTempFile, Vec<u8>)> {
    let content = patterned_bytes(len);
    let mut file = NamedTempFile::new()?;
    file.write_all(&content)?;
    file.flush()?;
    Ok((file, content))
}

/// Connected Unix stream pair registered with the current tokio runtime.
pub fn unix_pair() -> io::Result<(UnixStream, UnixStream)> {
    UnixStream::pair()
}

/// Connected loopback TCP pair: `(server side, client side)`.
pub async fn tcp_pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    Ok((accepted?.0, client?))
}

/// Reads `reader` to end of stream.
pub async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut received = Vec::new();
    reader.read_to_end(&mut received).await?;
    Ok(received)
}

/// Reads exactly `len` bytes from `reader`, at most `step` bytes per read,
/// sleeping `pause` between reads so the writer keeps hitting a full buffer.
pub async fn drain_slowly<R: AsyncRead + Unpin>(
    mut reader: R,
    len: usize,
    step: usize,
    pause: Duration,
) -> io::Result<Vec<u8>> {
    let mut received = Vec::with_capacity(len);
    let mut buf = vec![0u8; step.max(1)];
    while received.len() < len {
        let want = buf.len().min(len - received.len());
        let read = reader.read(&mut buf[..want]).await?;
        if read == 0 {
            break;
        }
        received.extend_from_slice(&buf[..read]);
        tokio::time::sleep(pause).await;
    }
    Ok(received)
}
