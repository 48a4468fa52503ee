//! Reclaim, poll and blocking waits.
//!
//! Waiters sleep on their caller's condvar under the queues lock. Before
//! sleeping they set the caller's `wakeup` flag; completions and releases
//! notify only when it is set. `interrupt` breaks any wait of the caller
//! with `Interrupted`.

use crate::complete::{charge_rusage, release};
use crate::request::QueueKind;
use crate::state::{Queues, Shared};
use aio_core::{AioCb, AioError, CallerId, Errno, IoResult, JobRef, Opcode, Result};

use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A request handed back by `wait_any`.
#[derive(Debug, Clone)]
pub struct Completion {
    pub cb: AioCb,
    pub result: IoResult,
}

/// Sleep until notified or `deadline`. `Again` once the deadline passed.
fn sleep<'a>(
    mut q: MutexGuard<'a, Queues>,
    caller: CallerId,
    deadline: Option<Instant>,
) -> Result<MutexGuard<'a, Queues>> {
    let remaining = match deadline {
        Some(d) => match d.checked_duration_since(Instant::now()) {
            Some(r) if !r.is_zero() => Some(r),
            _ => return Err(AioError::Again),
        },
        None => None,
    };
    let cv = {
        let c = q.caller_mut(caller)?;
        c.wakeup = true;
        Arc::clone(&c.cv)
    };
    let q = match remaining {
        Some(r) => cv.wait_timeout(q, r).unwrap_or_else(PoisonError::into_inner).0,
        None => cv.wait(q).unwrap_or_else(PoisonError::into_inner),
    };
    Ok(q)
}

/// Consume a pending interrupt.
fn take_interrupt(q: &mut Queues, caller: CallerId) -> Result<()> {
    let c = q.caller_mut(caller)?;
    if c.interrupted {
        c.interrupted = false;
        return Err(AioError::Interrupted);
    }
    Ok(())
}

/// Collect a finished request's result and free it.
///
/// `Fault` if the job reference names another control block; that
/// request is freed all the same.
pub(crate) fn reclaim(shared: &Shared, caller: CallerId, cb: &AioCb) -> Result<IoResult> {
    let job = cb.job_ref();
    if !job.is_valid() {
        return Err(AioError::Invalid);
    }
    let mut q = shared.queues();
    let c = q.caller_mut(caller)?;
    let (slot, req) = c.find(job).ok_or(AioError::Invalid)?;
    if !req.state.is_finished() {
        return Err(AioError::Invalid);
    }
    let same = req.cb.same_block(cb);
    charge_rusage(c, slot);
    let req = release(&mut q, shared, caller, slot)?;
    if !same {
        tracing::debug!(%caller, %job, "reclaim through a foreign control block");
        return Err(AioError::Fault);
    }
    Ok(req.result)
}

/// Error state of a request: `EINPROGRESS` until finished.
pub(crate) fn poll_error(shared: &Shared, caller: CallerId, cb: &AioCb) -> Result<Option<Errno>> {
    let job = cb.job_ref();
    if !job.is_valid() {
        return Err(AioError::Invalid);
    }
    let q = shared.queues();
    let (_, req) = q.caller(caller)?.find(job).ok_or(AioError::Invalid)?;
    Ok(if req.state.is_finished() {
        req.result.error
    } else {
        Some(Errno::EINPROGRESS)
    })
}

/// Block until one of `list` has finished.
pub(crate) fn suspend(
    shared: &Shared,
    caller: CallerId,
    list: &[Option<AioCb>],
    timeout: Option<Duration>,
) -> Result<()> {
    if list.len() >= shared.config.listio_max {
        return Err(AioError::Invalid);
    }
    let wanted: Vec<(JobRef, &AioCb)> = list.iter().flatten().map(|cb| (cb.job_ref(), cb)).collect();
    if wanted.is_empty() {
        return Ok(());
    }
    let deadline = timeout.map(|t| Instant::now() + t);

    let mut q = shared.queues();
    loop {
        let c = q.caller(caller)?;
        for kind in [QueueKind::Done, QueueKind::DoneDirect] {
            for slot in c.queue(kind) {
                let Some(req) = c.requests.get(*slot) else { continue };
                if let Some((_, cb)) = wanted.iter().find(|(job, _)| *job == req.job) {
                    return if req.cb.same_block(cb) {
                        Ok(())
                    } else {
                        Err(AioError::Invalid)
                    };
                }
            }
        }
        take_interrupt(&mut q, caller)?;
        q = sleep(q, caller, deadline)?;
    }
}

/// Take the oldest finished request of the caller, waiting if none.
pub(crate) fn wait_any(shared: &Shared, caller: CallerId, timeout: Option<Duration>) -> Result<Completion> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut q = shared.queues();
    loop {
        let c = q.caller_mut(caller)?;
        let next = c
            .queue(QueueKind::Done)
            .front()
            .or_else(|| c.queue(QueueKind::DoneDirect).front())
            .copied();
        if let Some(slot) = next {
            charge_rusage(c, slot);
            let req = release(&mut q, shared, caller, slot)?;
            return Ok(Completion {
                cb: req.cb,
                result: req.result,
            });
        }
        take_interrupt(&mut q, caller)?;
        q = sleep(q, caller, deadline)?;
    }
}

/// Wait-mode batch: block until `queued` entries of `entries` are done.
///
/// Accepted `Nop` entries and entries already reclaimed elsewhere count as
/// done. Finished entries have their charges moved to the caller.
pub(crate) fn batch_wait(shared: &Shared, caller: CallerId, entries: &[Option<AioCb>], queued: usize) -> Result<()> {
    let mut q = shared.queues();
    loop {
        let c = q.caller_mut(caller)?;
        let mut found = 0;
        let mut finished = Vec::new();
        for cb in entries.iter().flatten() {
            let job = cb.job_ref();
            if job == JobRef::NOP && cb.op().opcode == Opcode::Nop {
                found += 1;
                continue;
            }
            if !job.is_valid() {
                continue;
            }
            match c.find(job) {
                None => found += 1,
                Some((slot, req)) if req.state.is_finished() => {
                    found += 1;
                    finished.push(slot);
                }
                Some(_) => {}
            }
        }
        for slot in finished {
            charge_rusage(c, slot);
        }
        if found >= queued {
            return Ok(());
        }
        take_interrupt(&mut q, caller)?;
        q = sleep(q, caller, None)?;
    }
}

/// Break the caller's current (or next) blocking wait.
pub(crate) fn interrupt(shared: &Shared, caller: CallerId) -> Result<()> {
    let mut q = shared.queues();
    let c = q.caller_mut(caller)?;
    c.interrupted = true;
    c.cv.notify_all();
    Ok(())
}
