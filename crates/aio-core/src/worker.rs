//! Worker execution primitives.
//!
//! The manager owns worker scheduling. What it needs from the platform is
//! a way to start an execution unit, a way to put one to sleep and wake it,
//! and a way to make it act on behalf of a caller.
//!
//! # Implementors
//!
//! - `ThreadSpawner` (default): one OS thread per worker, condvar parking.
//! - `SharedContext` (default): no-op context switch; every worker already
//!   shares the process address space.

use crate::entry::CallerId;
use crate::error::Result;
use std::time::Duration;

/// Body of one worker. Runs until it returns.
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Sleep/wake primitive for one idle worker.
///
/// Each worker owns its own parking so the pool can wake a specific one.
pub trait WorkerParking: Send + Sync {
    /// Park until woken or until `timeout` passes.
    ///
    /// Returns `true` if woken by `wake_one`/`wake_all`, `false` on timeout.
    /// A wake that arrives before `park` is not lost. Callers re-check
    /// their condition after returning regardless of the result.
    fn park(&self, timeout: Option<Duration>) -> bool;

    fn wake_one(&self);

    fn wake_all(&self);

    /// Number of threads currently parked (hint, may be stale).
    fn parked_count(&self) -> usize;
}

/// Creates worker execution units.
///
/// **Contract:**
/// - `spawn()` returns once the unit is created; the body may start later.
/// - A creation failure is reported as `Err` and is never fatal.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, name: String, body: WorkerBody) -> Result<()>;

    fn new_parking(&self) -> Box<dyn WorkerParking>;
}

/// Switches a worker into and out of a caller's execution identity.
pub trait ExecContext: Send + Sync {
    fn adopt(&self, caller: CallerId);

    fn release(&self, caller: CallerId);
}

/// Shared address space: nothing to switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SharedContext;

impl ExecContext for SharedContext {
    fn adopt(&self, _caller: CallerId) {}

    fn release(&self, _caller: CallerId) {}
}
