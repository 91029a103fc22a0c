//! The accept loop: one sendfile operation per connected client.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sendfile::{
    Buffered, OptionsError, RuntimeSettings, SendFileError, SendFileOptions, SendFileOutcome,
    send_file,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::TryCurrentError;
use tracing::{debug, info, warn};

/// Everything the server needs to know, resolved from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    /// Address to bind.
    pub listen: SocketAddr,
    /// File to serve.
    pub file: PathBuf,
    /// First byte of the file to send.
    pub offset: u64,
    /// Bytes to send; `None` sends to the end of the file.
    pub length: Option<u64>,
    /// Maximum bytes per transfer syscall.
    pub chunk_size: u64,
    /// Time budget per connection; `None` is unlimited.
    pub timeout: Option<Duration>,
    /// Worker threads; `0` runs on the calling thread.
    pub threads: usize,
    /// Force the buffered read/write path.
    pub buffered: bool,
    /// Stop after the first client.
    pub once: bool,
}

impl ServeConfig {
    /// Opens the file and builds the transfer descriptor shared by every
    /// connection.
    pub fn options(&self) -> Result<SendFileOptions, OptionsError> {
        let options = SendFileOptions::open(&self.file)?
            .offset_and_size(self.offset, self.length.unwrap_or(u64::MAX))?
            .chunk_size(self.chunk_size);
        Ok(match self.timeout {
            Some(timeout) => options.timelimit(timeout),
            None => options,
        })
    }
}

/// Totals reported when a `--once` run stops.
///
/// A server without `--once` only stops on an accept failure, which is
/// reported as an error, so its per-connection counts are logged instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections accepted.
    pub connections: u64,
    /// Bytes the served connection accepted.
    pub bytes: u64,
}

/// Failure that stops the server.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The file or range could not be prepared.
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// The runtime could not be built.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    /// No runtime was available to drive transfers.
    #[error("no runtime available: {0}")]
    NoRuntime(#[from] TryCurrentError),

    /// The listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Writing the listening banner failed.
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),

    /// The single transfer of a `--once` run failed.
    #[error("transfer to {peer} failed after {transferred} bytes: {source}")]
    Transfer {
        /// Client address.
        peer: SocketAddr,
        /// Bytes accepted before the failure.
        transferred: u64,
        /// What went wrong.
        #[source]
        source: SendFileError,
    },
}

/// Builds the runtime, binds `config.listen`, prints `listening on ADDR` to
/// `stdout` and serves clients until a setup failure (or, with `--once`,
/// until the first client is done).
pub fn serve<W: Write>(config: &ServeConfig, stdout: &mut W) -> Result<ServeSummary, ServeError> {
    let options = config.options()?;
    let runtime = RuntimeSettings::from_thread_count(config.threads)
        .build()
        .map_err(ServeError::Runtime)?;

    runtime.block_on(async {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ServeError::Bind {
                addr: config.listen,
                source,
            })?;
        let local = listener.local_addr().map_err(ServeError::Accept)?;
        writeln!(stdout, "listening on {local}")
            .and_then(|()| stdout.flush())
            .map_err(ServeError::Output)?;
        info!(addr = %local, file = %config.file.display(), bytes = options.size(), "serving");

        serve_listener(listener, options, config.buffered, config.once).await
    })
}

/// Serves `options` to every client accepted on `listener`.
///
/// With `once` the first connection is served to completion and its totals
/// returned. Otherwise each connection runs in its own task, logs its own
/// byte count, and the loop only ends on an accept failure.
pub async fn serve_listener(
    listener: TcpListener,
    options: SendFileOptions,
    buffered: bool,
    once: bool,
) -> Result<ServeSummary, ServeError> {
    let options = Arc::new(options);
    let mut summary = ServeSummary::default();

    loop {
        let (stream, peer) = listener.accept().await.map_err(ServeError::Accept)?;
        summary.connections += 1;
        debug!(%peer, "accepted connection");

        if once {
            let outcome = transfer(&options, stream, buffered).await?;
            log_outcome(peer, &outcome);
            summary.bytes += outcome.transferred;
            return match outcome.result {
                Ok(()) => Ok(summary),
                Err(source) => Err(ServeError::Transfer {
                    peer,
                    transferred: outcome.transferred,
                    source,
                }),
            };
        }

        let options = Arc::clone(&options);
        tokio::spawn(async move {
            match transfer(&options, stream, buffered).await {
                Ok(outcome) => log_outcome(peer, &outcome),
                Err(error) => warn!(%peer, %error, "could not start transfer"),
            }
        });
    }
}

async fn transfer(
    options: &SendFileOptions,
    stream: TcpStream,
    buffered: bool,
) -> Result<SendFileOutcome, ServeError> {
    let outcome = if buffered {
        send_file(options, Arc::new(Buffered::new(stream))).await?
    } else {
        send_file(options, Arc::new(stream)).await?
    };
    Ok(outcome)
}

fn log_outcome(peer: SocketAddr, outcome: &SendFileOutcome) {
    match &outcome.result {
        Ok(()) => info!(%peer, bytes = outcome.transferred, "transfer complete"),
        Err(error) => warn!(
            %peer,
            bytes = outcome.transferred,
            %error,
            "transfer failed"
        ),
    }
}
