//! Structured tracing of sendfile operations.
//!
//! Every hook emits under the `sendfile::op` target. Without the `tracing`
//! feature the hooks are empty inline functions.

use std::io;

use crate::error::SendFileError;
use crate::executor::WaitOutcome;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

/// Trace one transfer attempt and what the syscall returned.
///
/// # Arguments
///
/// * `op` - Operation id
/// * `offset` - File offset the attempt started at
/// * `requested` - Upper bound on bytes for this attempt
/// * `result` - Syscall outcome
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_attempt(op: u64, offset: u64, requested: usize, result: &io::Result<usize>) {
    match result {
        Ok(sent) => trace!(
            target: "sendfile::op",
            op,
            offset,
            requested,
            sent,
            "attempt sent {} of {} bytes at offset {}",
            sent,
            requested,
            offset
        ),
        Err(err) => trace!(
            target: "sendfile::op",
            op,
            offset,
            requested,
            error = %err,
            "attempt at offset {} failed: {}",
            offset,
            err
        ),
    }
}

/// Trace one transfer attempt - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_attempt(_op: u64, _offset: u64, _requested: usize, _result: &io::Result<usize>) {}

/// Trace a writable-readiness wait being registered.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_suspend(op: u64, transferred: u64, remaining: u64) {
    trace!(
        target: "sendfile::op",
        op,
        transferred,
        remaining,
        "waiting for socket to become writable ({} bytes left)",
        remaining
    );
}

/// Trace a readiness wait being registered - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_suspend(_op: u64, _transferred: u64, _remaining: u64) {}

/// Trace how a readiness wait ended.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_resume(op: u64, outcome: &WaitOutcome) {
    let outcome = match outcome {
        WaitOutcome::Writable => "writable",
        WaitOutcome::Failed(_) => "failed",
        WaitOutcome::TimedOut => "timed-out",
    };
    trace!(target: "sendfile::op", op, outcome, "readiness wait ended: {}", outcome);
}

/// Trace how a readiness wait ended - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_resume(_op: u64, _outcome: &WaitOutcome) {}

/// Trace the final outcome of an operation.
///
/// # Arguments
///
/// * `op` - Operation id
/// * `result` - Result handed to the completion callback
/// * `transferred` - Bytes accepted by the socket
/// * `total` - Bytes requested
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_complete(op: u64, result: &Result<(), SendFileError>, transferred: u64, total: u64) {
    match result {
        Ok(()) => debug!(
            target: "sendfile::op",
            op,
            transferred,
            total,
            "sendfile complete: {} bytes",
            transferred
        ),
        Err(err) => debug!(
            target: "sendfile::op",
            op,
            transferred,
            total,
            error = %err,
            "sendfile failed after {} of {} bytes: {}",
            transferred,
            total,
            err
        ),
    }
}

/// Trace the final outcome of an operation - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_complete(
    _op: u64,
    _result: &Result<(), SendFileError>,
    _transferred: u64,
    _total: u64,
) {
}
