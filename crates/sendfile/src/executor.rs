//! Execution context for sendfile operations.
//!
//! The [`Executor`] owns no transfer state. It resumes suspended runners once
//! their socket becomes writable and enforces their absolute deadlines with
//! tokio timers. [`RuntimeSettings`] builds the runtime it runs on, either on
//! the calling thread or on a pool of worker threads.
//!
//! # Example
//!
//! ```
//! use sendfile::{Executor, RuntimeSettings};
//!
//! # fn main() -> std::io::Result<()> {
//! let runtime = RuntimeSettings::thread_pool(2).build()?;
//! let executor = Executor::from_handle(runtime.handle().clone());
//! assert_eq!(executor.handle().runtime_flavor(), tokio::runtime::RuntimeFlavor::MultiThread);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime, TryCurrentError};
use tokio::task::AbortHandle;
use tokio::time::{Instant, timeout_at};

use crate::transport::Transport;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME: &str = "sendfile-worker";

/// How a writable-readiness wait ended.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The socket can accept more bytes.
    Writable,
    /// The socket reported an error while waiting.
    Failed(io::Error),
    /// The deadline elapsed first; the wait was cancelled.
    TimedOut,
}

/// A registered readiness wait that has not resumed yet.
///
/// Aborting it drops the resume handler without running it.
#[derive(Debug)]
pub struct PendingWait(AbortHandle);

impl PendingWait {
    /// Cancels the wait. Its resume handler is dropped, never invoked.
    pub fn abort(&self) {
        self.0.abort();
    }
}

/// Scheduler that resumes runners suspended on socket writability.
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    /// Uses the runtime the caller is currently running on.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::from_handle)
    }

    /// Uses the runtime behind `handle`.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// The underlying runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Waits for `socket` to become writable, then runs `resume` exactly once
    /// with the outcome.
    ///
    /// If `deadline` passes first the readiness wait is dropped and `resume`
    /// receives [`WaitOutcome::TimedOut`]. The returned [`PendingWait`] can
    /// cancel the whole registration, in which case `resume` is dropped
    /// without running.
    pub fn register_writable_wait<S, F>(
        &self,
        socket: Arc<S>,
        deadline: Instant,
        resume: F,
    ) -> PendingWait
    where
        S: Transport,
        F: FnOnce(WaitOutcome) + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            let outcome = match timeout_at(deadline, socket.writable()).await {
                Ok(Ok(())) => WaitOutcome::Writable,
                Ok(Err(err)) => WaitOutcome::Failed(err),
                Err(_elapsed) => WaitOutcome::TimedOut,
            };
            resume(outcome);
        });
        PendingWait(task.abort_handle())
    }
}

/// Threading model of the runtime driving sendfile operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Everything runs on the thread that drives the runtime.
    ThisThread,
    /// Readiness callbacks run on a pool of worker threads.
    ThreadPool(NonZeroUsize),
}

/// Configuration for the runtime an [`Executor`] is built on.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Threading model.
    pub mode: RunMode,
    /// Name given to worker threads in [`RunMode::ThreadPool`].
    pub thread_name: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::this_thread()
    }
}

impl RuntimeSettings {
    /// Runs on the calling thread.
    #[must_use]
    pub fn this_thread() -> Self {
        Self {
            mode: RunMode::ThisThread,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }

    /// Runs on `threads` worker threads (at least one).
    #[must_use]
    pub fn thread_pool(threads: usize) -> Self {
        Self {
            mode: RunMode::ThreadPool(NonZeroUsize::new(threads).unwrap_or(NonZeroUsize::MIN)),
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }

    /// Picks [`RunMode::ThisThread`] for `0` and a pool otherwise.
    #[must_use]
    pub fn from_thread_count(threads: usize) -> Self {
        if threads == 0 {
            Self::this_thread()
        } else {
            Self::thread_pool(threads)
        }
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Builds a runtime with I/O and timers enabled.
    pub fn build(&self) -> io::Result<Runtime> {
        match self.mode {
            RunMode::ThisThread => Builder::new_current_thread().enable_all().build(),
            RunMode::ThreadPool(threads) => Builder::new_multi_thread()
                .worker_threads(threads.get())
                .thread_name(self.thread_name.clone())
                .enable_all()
                .build(),
        }
    }
}
