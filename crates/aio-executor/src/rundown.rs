//! Caller teardown.
//!
//! ```text
//! 1. Mark the caller in rundown: no new submissions, workers skip its jobs
//! 2. Wait (in bounded slices, retried) until nothing is running on a
//!    worker and no direct transfer is in flight
//! 3. Move readiness waits to the head of the worker queues
//! 4. Free done, pending and direct-done requests; pending ones never run
//! 5. Drop the caller context
//! ```

use crate::complete::release;
use crate::request::{JobState, QueueKind, Slot};
use crate::state::Shared;
use aio_core::{AioError, CallerId, Result};

use std::sync::{Arc, PoisonError};

pub(crate) fn rundown(shared: &Shared, caller: CallerId) -> Result<()> {
    let mut q = shared.queues();
    q.caller_mut(caller)?.rundown = true;
    tracing::debug!(%caller, "rundown started");

    // ── Step 2: drain work that cannot be freed ──
    loop {
        let c = q.caller(caller)?;
        if c.active == 0 && c.buffers == c.buffers_done {
            break;
        }
        let (active, in_flight) = (c.active, c.buffers - c.buffers_done);
        let cv = Arc::clone(&c.cv);
        let (guard, res) = cv
            .wait_timeout(q, shared.config.rundown_wait)
            .unwrap_or_else(PoisonError::into_inner);
        q = guard;
        if res.timed_out() {
            tracing::warn!(%caller, active, in_flight, "rundown still waiting");
        }
    }

    // ── Step 3: readiness waits join the worker queues ──
    let parked: Vec<Slot> = q.caller(caller)?.queue(QueueKind::Readiness).iter().rev().copied().collect();
    for slot in parked {
        let c = q.caller_mut(caller)?;
        if let Some(req) = c.requests.get_mut(slot) {
            req.withdraw_interest();
        }
        c.move_to_front(slot, JobState::QueuedWorker);
        q.global.push_front((caller, slot));
    }

    // ── Step 4: free everything ──
    let mut freed = 0usize;
    for kind in [QueueKind::Done, QueueKind::Pending, QueueKind::DoneDirect] {
        loop {
            let Some(slot) = q.caller(caller)?.queue(kind).front().copied() else {
                break;
            };
            release(&mut q, shared, caller, slot)?;
            freed += 1;
        }
    }

    // ── Step 5 ──
    let c = q.callers.remove(&caller).ok_or(AioError::NoCaller)?;
    if !c.requests.is_empty() {
        tracing::error!(%caller, left = c.requests.len(), "requests left at rundown");
    }
    if !c.groups.is_empty() {
        tracing::warn!(%caller, left = c.groups.len(), "batch groups left at rundown");
    }
    c.cv.notify_all();
    tracing::debug!(%caller, freed, "rundown complete");
    Ok(())
}
