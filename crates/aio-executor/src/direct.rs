//! Direct path: block-aligned transfers handed straight to the device.
//!
//! Eligible requests bypass the worker pool. The caller's buffer is pinned
//! for the duration of the transfer and the device reports completion
//! through a callback on its own thread. An error returned synchronously
//! by `strategy` finishes the request immediately; the submission itself
//! still succeeds and the error is read back through the result slot.

use crate::dispatch::finish_now;
use crate::request::{JobState, Request, Slot};
use crate::state::{Outbox, Queues, Shared};
use crate::caller::CallerContext;
use crate::complete::finish;
use aio_core::device::{BlockDone, BlockIo, BlockStatus, StrategyError};
use aio_core::target::IoTarget;
use aio_core::{AioCb, AioError, CallerId, IoResult, JobRef, Opcode, Result};

use std::sync::{Arc, MutexGuard};

/// Whether a transfer of `nbytes` on `target` may take the direct path.
pub(crate) fn eligible(shared: &Shared, c: &CallerContext, target: &dyn IoTarget, nbytes: usize) -> bool {
    let Some(dev) = target.as_block_device() else {
        return false;
    };
    let bsize = dev.block_size();
    bsize > 0
        && nbytes % bsize == 0
        && nbytes <= shared.config.max_transfer
        && c.buffers < c.limits.max_buffers
        && shared.direct().num_buffers < shared.config.max_buffers
}

/// Pin the buffer, account the request and hand it to the device.
#[allow(clippy::too_many_arguments)]
pub(crate) fn start(
    shared: &Arc<Shared>,
    mut q: MutexGuard<'_, Queues>,
    caller: CallerId,
    cb: &AioCb,
    job: JobRef,
    opcode: Opcode,
    target: Arc<dyn IoTarget>,
    group: Option<Slot>,
) -> Result<JobRef> {
    let op = cb.op();
    let buf = match op.buf.pin() {
        Ok(buf) => buf,
        Err(errno) => {
            cb.set_job_ref(JobRef::NONE);
            cb.publish(-1, Some(errno));
            return Err(AioError::from(errno));
        }
    };

    let req = Request::new(cb.clone(), job, opcode, Arc::clone(&target), JobState::QueuedDirect);
    let slot = {
        let c = q.caller_mut(caller)?;
        if let Some(g) = group.and_then(|g| c.groups.get_mut(g)) {
            g.buffered += 1;
        }
        c.buffers += 1;
        let mut req = req;
        req.group = group;
        c.admit(req)
    };
    q.num_queued += 1;
    shared.direct().num_buffers += 1;
    drop(q);

    let io = BlockIo {
        opcode,
        offset: op.offset,
        len: op.nbytes,
        buf,
    };
    let Some(dev) = target.as_block_device() else {
        io.buf.unpin();
        finish_now(shared, shared.queues(), caller, slot, IoResult::failed(aio_core::Errno::ENODEV));
        return Ok(job);
    };
    match dev.strategy(io, completion(shared, caller, slot, job)) {
        Ok(()) => tracing::trace!(%caller, %job, "direct transfer started"),
        Err(StrategyError { errno, io }) => {
            io.buf.unpin();
            tracing::debug!(%caller, %job, %errno, "device rejected direct transfer");
            finish_now(shared, shared.queues(), caller, slot, IoResult::failed(errno));
        }
    }
    Ok(job)
}

/// Device callback for one transfer. Holds the manager weakly.
fn completion(shared: &Arc<Shared>, caller: CallerId, slot: Slot, job: JobRef) -> BlockDone {
    let weak = Arc::downgrade(shared);
    Box::new(move |io: BlockIo, status: BlockStatus| {
        let BlockIo { buf, len, .. } = io;
        buf.unpin();
        let result = match status.error {
            Some(errno) => IoResult::failed(errno),
            None => IoResult::ok(len.saturating_sub(status.resid)),
        };
        if let Some(shared) = weak.upgrade() {
            complete(&shared, caller, slot, job, result);
        }
    })
}

/// Finish a direct request from the device callback.
pub(crate) fn complete(shared: &Shared, caller: CallerId, slot: Slot, job: JobRef, result: IoResult) {
    let mut out = Outbox::new();
    {
        let mut q = shared.queues();
        let known = q
            .caller(caller)
            .ok()
            .and_then(|c| c.requests.get(slot))
            .is_some_and(|r| r.job == job);
        if !known {
            tracing::warn!(%caller, %job, "completion for unknown direct request");
            return;
        }
        if let Err(e) = finish(&mut q, caller, slot, result, &mut out) {
            tracing::error!(%caller, %job, error = %e, "direct completion rejected");
        }
    }
    out.deliver(&*shared.notifier);
}
