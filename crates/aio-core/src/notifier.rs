//! Caller notification abstraction.
//!
//! A `Notifier` delivers completion notices to callers that asked for one
//! through `SigEvent`.
//!
//! # Implementors
//!
//! - `QueueNotifier` (default): records every notice in a lock-free queue
//!   that the embedding program drains.
//! - `EventFdNotifier` (Linux): additionally bumps an eventfd so a poll
//!   loop wakes up.

use crate::entry::{CallerId, JobRef};
use nix::sys::signal::Signal;

/// Delivers request and group completion notices.
///
/// **Contract:**
/// - Neither method may block.
/// - The manager never calls the notifier while holding its own locks, so
///   implementations may call back into the manager.
pub trait Notifier: Send + Sync {
    /// Signal-like delivery.
    fn signal(&self, caller: CallerId, sig: Signal);

    /// Event-queue-like delivery. `job` is `JobRef::NONE` for a group notice.
    fn event(&self, caller: CallerId, job: JobRef, udata: u64);
}
