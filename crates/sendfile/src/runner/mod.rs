//! The transfer runner: drives one file range into one socket.
//!
//! A runner loops issuing transfer attempts through its transport's
//! [`CopyStrategy`]. Successful attempts are accounted and the loop continues
//! at once; a would-block result (or an attempt that moved zero bytes)
//! registers a single writable-readiness wait on the [`Executor`] and returns
//! control. The wait holds a strong reference to the runner, so a suspended
//! operation stays alive until it resumes, even if every caller handle has
//! been dropped.
//!
//! The completion callback fires exactly once: on success, on the first
//! fatal error, on deadline expiry, on cancellation, or (as
//! [`SendFileError::Cancelled`]) when the runtime discards a pending wait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sendfile::{SendFileOptions, send_file};
//! use tokio::net::TcpStream;
//!
//! # async fn serve(stream: TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let options = SendFileOptions::open("video.mp4")?
//!     .chunk_size(256 * 1024)
//!     .timelimit(Duration::from_secs(120));
//! let outcome = send_file(&options, Arc::new(stream)).await?;
//! println!("sent {} bytes", outcome.transferred);
//! outcome.result?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SendFileError;
use crate::executor::{Executor, PendingWait, WaitOutcome};
use crate::options::SendFileOptions;
use crate::trace::{trace_attempt, trace_complete, trace_resume, trace_suspend};
use crate::transport::{CopyStrategy, Transport};


/// Callback receiving the outcome and the number of bytes sent.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), SendFileError>, u64) + Send + 'static>;

/// Deadline used when the time budget does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Computes the absolute deadline for a time budget starting now.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    next_offset: u64,
    remaining: u64,
    transferred: u64,
}

struct RunnerState<C> {
    progress: Progress,
    copy: C,
    pending_wait: Option<PendingWait>,
    nonblocking: bool,
    finished: bool,
}

enum Step {
    Suspended,
    Finished(Result<(), SendFileError>, u64),
}

struct Runner<S: Transport> {
    id: u64,
    file: Arc<File>,
    socket: Arc<S>,
    executor: Executor,
    chunk_size: u64,
    total: u64,
    deadline: Instant,
    state: Mutex<RunnerState<S::Copy>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl<S: Transport> Runner<S> {
    fn lock_state(&self) -> MutexGuard<'_, RunnerState<S::Copy>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs attempts until the range is sent, a wait is registered, or a
    /// fatal error occurs.
    fn advance(self: &Arc<Self>) {
        let step = {
            let mut state = self.lock_state();
            if state.finished {
                return;
            }
            let step = self.run_attempts(&mut state);
            if matches!(step, Step::Finished(..)) {
                state.finished = true;
            }
            step
        };
        if let Step::Finished(result, transferred) = step {
            self.fire(result, transferred);
        }
    }

    fn run_attempts(self: &Arc<Self>, state: &mut RunnerState<S::Copy>) -> Step {
        if !state.nonblocking {
            if let Err(err) = self.socket.ensure_nonblocking() {
                return Step::Finished(
                    Err(SendFileError::ModeSwitchFailed(err)),
                    state.progress.transferred,
                );
            }
            state.nonblocking = true;
        }

        while state.progress.remaining > 0 {
            let max_bytes = state.progress.remaining.min(self.chunk_size) as usize;
            let offset = state.progress.next_offset;
            let result = state.copy.attempt(
                &self.socket,
                &self.file,
                &mut state.progress.next_offset,
                max_bytes,
            );
            trace_attempt(self.id, offset, max_bytes, &result);

            match result {
                Ok(0) => {
                    self.suspend(state);
                    return Step::Suspended;
                }
                Ok(sent) => {
                    debug_assert!(sent <= max_bytes, "transport sent more than requested");
                    let sent = sent as u64;
                    state.progress.remaining -= sent;
                    state.progress.transferred += sent;
                    debug_assert_eq!(
                        state.progress.remaining + state.progress.transferred,
                        self.total
                    );
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.suspend(state);
                    return Step::Suspended;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    return Step::Finished(
                        Err(SendFileError::TransferFailed(err)),
                        state.progress.transferred,
                    );
                }
            }
        }

        Step::Finished(Ok(()), state.progress.transferred)
    }

    fn suspend(self: &Arc<Self>, state: &mut RunnerState<S::Copy>) {
        trace_suspend(self.id, state.progress.transferred, state.progress.remaining);
        let runner = Arc::clone(self);
        let pending = self.executor.register_writable_wait(
            Arc::clone(&self.socket),
            self.deadline,
            move |outcome| runner.resume(outcome),
        );
        state.pending_wait = Some(pending);
    }

    fn resume(self: Arc<Self>, outcome: WaitOutcome) {
        trace_resume(self.id, &outcome);
        let finished = {
            let mut state = self.lock_state();
            state.pending_wait = None;
            if state.finished {
                return;
            }
            let result = match outcome {
                WaitOutcome::Writable if state.progress.remaining > 0 => None,
                WaitOutcome::Writable => Some(Ok(())),
                WaitOutcome::Failed(err) => Some(Err(SendFileError::WaitFailed(err))),
                WaitOutcome::TimedOut => Some(Err(SendFileError::DeadlineExceeded)),
            };
            if result.is_some() {
                state.finished = true;
            }
            result.map(|result| (result, state.progress.transferred))
        };
        match finished {
            Some((result, transferred)) => self.fire(result, transferred),
            None => self.advance(),
        }
    }

    fn cancel(&self) -> bool {
        let transferred = {
            let mut state = self.lock_state();
            if state.finished {
                return false;
            }
            state.finished = true;
            if let Some(pending) = state.pending_wait.take() {
                pending.abort();
            }
            state.progress.transferred
        };
        self.fire(Err(SendFileError::Cancelled), transferred);
        true
    }

    fn fire(&self, result: Result<(), SendFileError>, transferred: u64) {
        let callback = self
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            trace_complete(self.id, &result, transferred, self.total);
            callback(result, transferred);
        }
    }
}

impl<S: Transport> Drop for Runner<S> {
    fn drop(&mut self) {
        let callback = self
            .on_complete
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            let transferred = self
                .state
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .progress
                .transferred;
            let result = Err(SendFileError::Cancelled);
            trace_complete(self.id, &result, transferred, self.total);
            callback(result, transferred);
        }
    }
}

/// A prepared sendfile operation that has not started yet.
pub struct SendFileOperation<S: Transport> {
    runner: Arc<Runner<S>>,
}

impl<S: Transport> fmt::Debug for SendFileOperation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFileOperation")
            .field("id", &self.runner.id)
            .field("total", &self.runner.total)
            .field("chunk_size", &self.runner.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<S: Transport> SendFileOperation<S> {
    /// Prepares an operation sending `options`' range into `socket`.
    ///
    /// The deadline is fixed here, as `now + options.time_budget()`, and is
    /// never recomputed. Nothing is sent until [`start`](Self::start).
    pub fn new<F>(
        options: &SendFileOptions,
        executor: Executor,
        socket: Arc<S>,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(Result<(), SendFileError>, u64) + Send + 'static,
    {
        let state = RunnerState {
            progress: Progress {
                next_offset: options.offset(),
                remaining: options.size(),
                transferred: 0,
            },
            copy: <S::Copy as CopyStrategy<S>>::for_chunk_size(options.chunk_len()),
            pending_wait: None,
            nonblocking: false,
            finished: false,
        };
        let runner = Runner {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            file: Arc::clone(options.file()),
            socket,
            executor,
            chunk_size: options.chunk_len(),
            total: options.size(),
            deadline: deadline_after(options.time_budget()),
            state: Mutex::new(state),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };
        Self {
            runner: Arc::new(runner),
        }
    }

    /// Absolute deadline of the operation.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.runner.deadline
    }

    /// Runs the first round of attempts on the calling thread and returns a
    /// handle for observing or cancelling the rest.
    ///
    /// Later rounds run on the executor. If the range fits in the socket
    /// buffer the completion callback has already fired when this returns.
    pub fn start(self) -> SendFileHandle<S> {
        self.runner.advance();
        SendFileHandle {
            runner: self.runner,
        }
    }
}

/// Caller-side handle of a started sendfile operation.
///
/// Cloning the handle shares the same operation. Dropping every handle does
/// not stop the operation; use [`cancel`](Self::cancel) for that.
pub struct SendFileHandle<S: Transport> {
    runner: Arc<Runner<S>>,
}

impl<S: Transport> Clone for SendFileHandle<S> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<S: Transport> fmt::Debug for SendFileHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.runner.lock_state();
        f.debug_struct("SendFileHandle")
            .field("id", &self.runner.id)
            .field("total", &self.runner.total)
            .field("progress", &state.progress)
            .field("finished", &state.finished)
            .finish_non_exhaustive()
    }
}

impl<S: Transport> SendFileHandle<S> {
    /// Cancels the operation.
    ///
    /// A pending readiness wait is aborted and the completion callback
    /// receives [`SendFileError::Cancelled`]. Returns `false` if the
    /// operation had already finished.
    pub fn cancel(&self) -> bool {
        self.runner.cancel()
    }

    /// Process-unique id of the operation, as used in trace events.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.runner.id
    }

    /// Bytes accepted by the socket so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.runner.lock_state().progress.transferred
    }

    /// Bytes still to send.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.runner.lock_state().progress.remaining
    }

    /// Total bytes requested.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.runner.total
    }

    /// Offset of the next byte to send.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.runner.lock_state().progress.next_offset
    }

    /// Absolute deadline of the operation.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.runner.deadline
    }

    /// Whether the completion callback has been (or is being) invoked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.runner.lock_state().finished
    }

    /// Whether a readiness wait is currently registered.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.runner.lock_state().pending_wait.is_some()
    }
}

/// Final outcome of [`send_file`].
#[derive(Debug)]
pub struct SendFileOutcome {
    /// `Ok(())` when every requested byte was sent.
    pub result: Result<(), SendFileError>,
    /// Bytes accepted by the socket.
    pub transferred: u64,
}

/// Sends `options`' range into `socket` on the current runtime and resolves
/// with the outcome delivered to the completion callback.
///
/// Dropping the returned future does not cancel the transfer.
pub async fn send_file<S: Transport>(
    options: &SendFileOptions,
    socket: Arc<S>,
) -> Result<SendFileOutcome, tokio::runtime::TryCurrentError> {
    let executor = Executor::try_current()?;
    let (tx, rx) = oneshot::channel();
    let operation = SendFileOperation::new(options, executor, socket, move |result, transferred| {
        let _ = tx.send(SendFileOutcome {
            result,
            transferred,
        });
    });
    drop(operation.start());
    Ok(rx.await.unwrap_or(SendFileOutcome {
        result: Err(SendFileError::Cancelled),
        transferred: 0,
    }))
}
