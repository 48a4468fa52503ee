//! Completion and release.
//!
//! Every path that ends a request goes through `finish`: worker
//! completion, direct-path callback or immediate device error, and
//! cancellation. Every path that frees one goes through `release`:
//! reclaim, `wait_any`, rollback of a failed submission and rundown.
//! Both run under the queues lock and never call a collaborator; notices
//! go to the caller's `Outbox`.

use crate::caller::{dec, CallerContext};
use crate::request::{JobState, Request, Slot};
use crate::state::{Outbox, Queues, Shared};
use aio_core::{AioError, CallerId, IoResult, JobRef, Result};

/// Move a request to its finished state and record `result`.
///
/// Finishing a request twice is rejected with `AlreadyFinished`.
pub(crate) fn finish(
    q: &mut Queues,
    caller: CallerId,
    slot: Slot,
    result: IoResult,
    out: &mut Outbox,
) -> Result<()> {
    let c = q.caller_mut(caller)?;
    let req = c.requests.get_mut(slot).ok_or(AioError::Invalid)?;
    if req.state.is_finished() {
        return Err(AioError::AlreadyFinished);
    }
    let direct = req.state.is_direct();
    req.result = result;
    req.cb.publish(result.status, result.error);
    let job = req.job;
    let sigevent = req.cb.op().sigevent;
    let group = req.group;

    c.transition(
        slot,
        if direct { JobState::FinishedDirect } else { JobState::FinishedQueued },
    );
    if direct {
        c.buffers_done += 1;
    } else {
        c.queued_done += 1;
    }

    if let Some(g) = group.and_then(|g| c.groups.get_mut(g)) {
        if direct {
            g.buffered_done += 1;
        } else {
            g.queued_done += 1;
        }
        if let Some(ev) = g.take_notice() {
            out.sigevent(caller, JobRef::NONE, ev);
        }
    }

    c.wake_requested();
    if c.rundown && ((direct && c.buffers_done == c.buffers) || (!direct && c.active == 0)) {
        c.cv.notify_all();
    }
    out.sigevent(caller, job, sigevent);
    tracing::trace!(%caller, %job, status = result.status, error = ?result.error, "request finished");
    Ok(())
}

/// Free a request that is not running and undo its accounting.
pub(crate) fn release(q: &mut Queues, shared: &Shared, caller: CallerId, slot: Slot) -> Result<Request> {
    let state = q
        .caller(caller)?
        .requests
        .get(slot)
        .map(|r| r.state)
        .ok_or(AioError::Invalid)?;
    match state {
        JobState::Running => panic!("release of running request {:?} of {}", slot, caller),
        JobState::QueuedWorker => q.dequeue((caller, slot)),
        _ => {}
    }

    let c = q.caller_mut(caller)?;
    let req = c.evict(slot);
    let finished = state.is_finished();
    if state.is_direct() {
        dec(&mut c.buffers, "caller buffers");
        if finished {
            dec(&mut c.buffers_done, "caller buffers done");
        }
        dec(&mut shared.direct().num_buffers, "global buffers");
    } else {
        dec(&mut c.queued, "caller queued");
        if finished {
            dec(&mut c.queued_done, "caller queued done");
        }
    }

    if let Some(gslot) = req.group {
        let empty = match c.groups.get_mut(gslot) {
            Some(g) => {
                if state.is_direct() {
                    dec(&mut g.buffered, "group buffered");
                    if finished {
                        dec(&mut g.buffered_done, "group buffered done");
                    }
                } else {
                    dec(&mut g.queued, "group queued");
                    if finished {
                        dec(&mut g.queued_done, "group queued done");
                    }
                }
                g.sealed && g.is_empty()
            }
            None => false,
        };
        if empty {
            c.groups.remove(gslot);
        }
    }

    c.wake_requested();
    if c.rundown && c.buffers == 0 && c.queued == 0 {
        c.cv.notify_all();
    }
    dec(&mut q.num_queued, "global queued");
    Ok(req)
}

/// Mark a batch fully submitted. Frees it if nothing was queued, or
/// posts its notice if every member already finished.
pub(crate) fn seal_group(q: &mut Queues, caller: CallerId, gslot: Slot, out: &mut Outbox) -> Result<()> {
    let c = q.caller_mut(caller)?;
    let Some(g) = c.groups.get_mut(gslot) else {
        return Ok(());
    };
    g.sealed = true;
    if g.is_empty() {
        c.groups.remove(gslot);
    } else if let Some(ev) = g.take_notice() {
        out.sigevent(caller, JobRef::NONE, ev);
    }
    Ok(())
}

/// Move a finished request's block charges into the caller's usage.
pub(crate) fn charge_rusage(c: &mut CallerContext, slot: Slot) {
    if let Some(req) = c.requests.get_mut(slot) {
        let charge = std::mem::take(&mut req.charge);
        c.rusage.in_blocks += charge.in_blocks;
        c.rusage.out_blocks += charge.out_blocks;
    }
}
