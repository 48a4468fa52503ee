//! Readiness-gated targets.

use crate::entry::Direction;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot readiness callback.
///
/// A waker can be retired through its `WakerHandle` before it fires; a
/// retired waker does nothing when woken.
pub struct ReadyWaker {
    f: Box<dyn FnOnce() + Send>,
    live: Arc<AtomicBool>,
}

impl ReadyWaker {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Box::new(f),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> WakerHandle {
        WakerHandle(Arc::clone(&self.live))
    }

    /// `false` once retired.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn wake(self) {
        if self.live.swap(false, Ordering::AcqRel) {
            (self.f)()
        }
    }
}

impl fmt::Debug for ReadyWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadyWaker(live: {})", self.is_live())
    }
}

/// Retires a registered `ReadyWaker` from the outside.
#[derive(Debug, Clone)]
pub struct WakerHandle(Arc<AtomicBool>);

impl WakerHandle {
    pub fn retire(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A target that must be ready before a transfer can proceed.
///
/// **Contract:**
/// - `register_interest()` either keeps the waker and calls it once when
///   `dir` becomes ready, or, if the target is already ready, returns it
///   unused. This closes the gap between `is_ready` and registration.
/// - Wakers must be invoked without holding the target's internal locks.
/// - `prune()` drops wakers that were retired before firing. The manager
///   calls it after retiring one, with its own lock held, so it must not
///   invoke any waker.
pub trait Pollable: Send + Sync {
    fn is_ready(&self, dir: Direction) -> bool;

    fn register_interest(&self, dir: Direction, waker: ReadyWaker) -> Option<ReadyWaker>;

    fn prune(&self) {}
}
