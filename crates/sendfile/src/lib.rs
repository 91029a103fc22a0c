//! Asynchronous file-to-socket transfer for HTTP response bodies.
//!
//! Given an open file, a byte range, a chunk size and a time budget, this
//! crate streams the range into a connected socket without blocking the
//! calling thread and reports exactly how many bytes the socket accepted.
//!
//! # Features
//!
//! - **Zero-copy send** using `sendfile(2)` on plain TCP and Unix stream
//!   sockets, with an explicit offset so the file cursor never moves
//! - **Buffered fallback** for transports that can only accept byte slices
//! - **Readiness-driven resumption** on the tokio reactor; an operation
//!   never spins on a full socket buffer
//! - **Absolute deadlines** fixed when the operation is created
//! - **Exactly-once completion** on every path, including cancellation and
//!   runtime shutdown
//!
//! # Design Principles
//!
//! 1. **Static dispatch** - the copy strategy is an associated type of the
//!    transport and is never re-checked per attempt
//! 2. **Loop while the socket accepts** - a wait is registered only after a
//!    would-block or zero-byte result
//! 3. **Self-owning operations** - a suspended operation is kept alive by
//!    its pending wait, not by its caller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sendfile::{Executor, SendFileOperation, SendFileOptions};
//! use tokio::net::TcpStream;
//!
//! # async fn respond(stream: TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let options = SendFileOptions::open("large.bin")?.offset_and_size(0, 1 << 20)?;
//! let operation = SendFileOperation::new(
//!     &options,
//!     Executor::try_current()?,
//!     Arc::new(stream),
//!     |result, transferred| match result {
//!         Ok(()) => println!("sent {transferred} bytes"),
//!         Err(err) => eprintln!("failed after {transferred} bytes: {err}"),
//!     },
//! );
//! let handle = operation.start();
//! println!("{} bytes still queued", handle.remaining());
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

#[cfg(not(unix))]
compile_error!("the sendfile crate supports Unix platforms only");

pub mod error;
pub mod executor;
pub mod options;
pub mod runner;
pub mod trace;
pub mod transport;

pub use error::{OptionsError, SendFileError};
pub use executor::{
    DEFAULT_THREAD_NAME, Executor, PendingWait, RunMode, RuntimeSettings, WaitOutcome,
};
pub use options::{DEFAULT_CHUNK_SIZE, FileMeta, MAX_CHUNK_SIZE, SendFileOptions, open_file};
pub use runner::{
    CompletionCallback, SendFileHandle, SendFileOperation, SendFileOutcome, send_file,
};
pub use transport::{
    Buffered, BufferedCopy, CopyStrategy, MAX_BUFFER_SIZE, Transport, TryWrite, ZeroCopy,
    set_nonblocking,
};
