//! # aio-executor: The asynchronous I/O request manager
//!
//! Callers submit reads and writes that must not block them. The manager
//! queues them under global and per-caller quotas and runs them on a pool
//! of worker threads or hands them straight to a block device. It then
//! tracks completion and notifies the caller.
//!
//! ```text
//!            submit / submit_batch
//!                    │
//!              ┌─────▼──────┐
//!              │  dispatch  │  validate, quotas, job ref
//!              └─────┬──────┘
//!      ┌─────────────┼──────────────────┐
//!      ▼             ▼                  ▼
//!  readiness     direct path        global FIFO ──▶ worker pool
//!  (parked)   (device callback)          ▲         (blocking transfer)
//!      │             │                   │               │
//!      └── ready ────┼───────────────────┘               │
//!                    ▼                                   ▼
//!              ┌──────────────────────────────────────────────┐
//!              │ complete: result, done queue, group, notices │
//!              └──────────────────────┬───────────────────────┘
//!                                     ▼
//!                  reclaim / suspend / wait_any / batch wait
//! ```
//!
//! The manager is generic over every collaborator in `aio-core`; the
//! defaults come from `aio-module`.
//!
//! ```rust,ignore
//! let mgr = Manager::builder().build()?;
//! mgr.register_caller(caller, table)?;
//! let cb = AioOp::read(fd, IoBuf::new(4096), 0).into_cb();
//! mgr.submit(caller, &cb)?;
//! mgr.suspend(caller, &[Some(cb.clone())], None)?;
//! let result = mgr.reclaim(caller, &cb)?;
//! ```

pub mod builder;
pub mod config;

mod cancel;
mod caller;
mod complete;
mod direct;
mod dispatch;
mod group;
mod pool;
mod request;
mod rundown;
mod state;
mod wait;

#[cfg(test)]
mod testkit;

pub use builder::ManagerBuilder;
pub use caller::{CallerStats, Rusage};
pub use cancel::CancelVerdict;
pub use config::{AioConfig, CallerLimits, ConfigError};
pub use dispatch::{BatchMode, BatchOutcome};
pub use wait::Completion;

use caller::CallerContext;
use state::Shared;

use aio_core::target::TargetTable;
use aio_core::{AioCb, AioError, CallerId, Errno, IoResult, JobRef, Opcode, Result, SigEvent, TargetId};

use std::sync::Arc;
use std::time::Duration;

/// Manager-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub workers: usize,
    pub idle_workers: usize,
    /// Worker creations in progress.
    pub reserved_workers: usize,
    /// Outstanding requests across all callers.
    pub queued: usize,
    /// Jobs waiting in the global worker queue.
    pub global_queue: usize,
    /// Direct-path requests not yet reclaimed.
    pub buffers: usize,
    pub callers: usize,
}

pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Register a caller with the configured default limits.
    pub fn register_caller(&self, caller: CallerId, table: Arc<dyn TargetTable>) -> Result<()> {
        let limits = self.shared.config.caller_limits();
        self.register_caller_with(caller, table, limits)
    }

    /// Register a caller with its own limits. `Invalid` if already known.
    pub fn register_caller_with(
        &self,
        caller: CallerId,
        table: Arc<dyn TargetTable>,
        limits: CallerLimits,
    ) -> Result<()> {
        let mut q = self.shared.queues();
        if q.callers.contains_key(&caller) {
            return Err(AioError::Invalid);
        }
        q.callers.insert(caller, CallerContext::new(caller, table, limits));
        tracing::debug!(%caller, ?limits, "caller registered");
        Ok(())
    }

    /// Submit the operation the control block names.
    pub fn submit(&self, caller: CallerId, cb: &AioCb) -> Result<JobRef> {
        dispatch::enqueue(&self.shared, caller, cb, cb.op().opcode, None)
    }

    /// Submit `cb` as a read regardless of its opcode.
    pub fn submit_read(&self, caller: CallerId, cb: &AioCb) -> Result<JobRef> {
        dispatch::enqueue(&self.shared, caller, cb, Opcode::Read, None)
    }

    /// Submit `cb` as a write regardless of its opcode.
    pub fn submit_write(&self, caller: CallerId, cb: &AioCb) -> Result<JobRef> {
        dispatch::enqueue(&self.shared, caller, cb, Opcode::Write, None)
    }

    /// Submit a batch. `None` entries are skipped.
    ///
    /// In `Wait` mode this returns once every accepted entry finished;
    /// their results are then reclaimed with `reclaim`. In `NoWait` mode
    /// `sigevent` fires once all accepted entries finished.
    pub fn submit_batch(
        &self,
        caller: CallerId,
        mode: BatchMode,
        entries: &[Option<AioCb>],
        sigevent: SigEvent,
    ) -> Result<BatchOutcome> {
        dispatch::submit_batch(&self.shared, caller, mode, entries, sigevent)
    }

    /// Read on the calling thread. Returns bytes transferred.
    pub fn read_sync(&self, caller: CallerId, cb: &AioCb) -> Result<usize> {
        dispatch::run_sync(&self.shared, caller, cb, Opcode::Read)
    }

    /// Write on the calling thread. Returns bytes transferred.
    pub fn write_sync(&self, caller: CallerId, cb: &AioCb) -> Result<usize> {
        dispatch::run_sync(&self.shared, caller, cb, Opcode::Write)
    }

    /// Collect a finished request's result and free it.
    pub fn reclaim(&self, caller: CallerId, cb: &AioCb) -> Result<IoResult> {
        wait::reclaim(&self.shared, caller, cb)
    }

    /// `Some(EINPROGRESS)` while outstanding, then the request's error.
    pub fn poll_error(&self, caller: CallerId, cb: &AioCb) -> Result<Option<Errno>> {
        wait::poll_error(&self.shared, caller, cb)
    }

    /// Block until one of `list` has finished, or `timeout` (`Again`).
    pub fn suspend(&self, caller: CallerId, list: &[Option<AioCb>], timeout: Option<Duration>) -> Result<()> {
        wait::suspend(&self.shared, caller, list, timeout)
    }

    /// Block until any request of the caller finished; reclaim and return it.
    pub fn wait_any(&self, caller: CallerId, timeout: Option<Duration>) -> Result<Completion> {
        wait::wait_any(&self.shared, caller, timeout)
    }

    /// Cancel requests on `target`, or just `cb`.
    pub fn cancel(&self, caller: CallerId, target: TargetId, cb: Option<&AioCb>) -> Result<CancelVerdict> {
        cancel::cancel(&self.shared, caller, target, cb)
    }

    /// Break the caller's current (or next) blocking wait with `Interrupted`.
    pub fn interrupt(&self, caller: CallerId) -> Result<()> {
        wait::interrupt(&self.shared, caller)
    }

    /// Tear a caller down: wait out running work, free everything else.
    pub fn rundown(&self, caller: CallerId) -> Result<()> {
        rundown::rundown(&self.shared, caller)
    }

    /// Block charges collected by reclaimed requests and sync transfers.
    pub fn rusage(&self, caller: CallerId) -> Result<Rusage> {
        Ok(self.shared.queues().caller(caller)?.rusage)
    }

    pub fn stats(&self) -> ManagerStats {
        let q = self.shared.queues();
        let buffers = self.shared.direct().num_buffers;
        ManagerStats {
            workers: q.workers.count(),
            idle_workers: q.workers.free.len(),
            reserved_workers: q.workers.resv,
            queued: q.num_queued,
            global_queue: q.global.len(),
            buffers,
            callers: q.callers.len(),
        }
    }

    pub fn caller_stats(&self, caller: CallerId) -> Result<CallerStats> {
        Ok(self.shared.queues().caller(caller)?.stats())
    }

    pub fn config(&self) -> &AioConfig {
        &self.shared.config
    }

    /// Stop accepting work and let the workers exit.
    pub fn shutdown(&self) {
        pool::shutdown(&self.shared);
        tracing::debug!("aio manager shut down");
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
