//! Cancellation of queued requests.

use crate::complete::finish;
use crate::request::{JobState, QueueKind, Slot};
use crate::state::{Outbox, Shared};
use aio_core::{AioCb, AioError, CallerId, Errno, IoResult, Result, TargetId};

/// Outcome of `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelVerdict {
    /// Nothing matched that was still in progress.
    AllDone,
    /// Every matching request was canceled.
    Canceled,
    /// At least one match was running or in flight on the device.
    NotCanceled,
}

/// Cancel the caller's requests on `target`, or only `cb` if given.
///
/// Requests waiting for readiness or for a worker finish with
/// `ECANCELED`. Running worker requests and accepted direct-path
/// transfers are left alone.
pub(crate) fn cancel(shared: &Shared, caller: CallerId, target: TargetId, cb: Option<&AioCb>) -> Result<CancelVerdict> {
    let mut out = Outbox::new();
    let (canceled, refused) = {
        let mut q = shared.queues();
        let c = q.caller(caller)?;
        if c.table.resolve(target).is_none() {
            return Err(AioError::BadTarget);
        }
        let matches: Vec<(Slot, JobState)> = [QueueKind::Readiness, QueueKind::Pending, QueueKind::PendingDirect]
            .into_iter()
            .flat_map(|kind| c.queue(kind).iter())
            .filter_map(|slot| {
                let req = c.requests.get(*slot)?;
                let hit = req.cb.op().target == target && cb.map_or(true, |cb| req.cb.same_block(cb));
                hit.then_some((*slot, req.state))
            })
            .collect();

        let mut canceled = 0;
        let mut refused = 0;
        for (slot, state) in matches {
            match state {
                JobState::QueuedReadiness | JobState::QueuedWorker => {
                    if state == JobState::QueuedWorker {
                        q.dequeue((caller, slot));
                    } else if let Some(req) = q.caller_mut(caller)?.requests.get_mut(slot) {
                        req.withdraw_interest();
                    }
                    finish(&mut q, caller, slot, IoResult::failed(Errno::ECANCELED), &mut out)?;
                    canceled += 1;
                }
                _ => refused += 1,
            }
            if cb.is_some() {
                break;
            }
        }
        (canceled, refused)
    };
    out.deliver(&*shared.notifier);

    let verdict = if refused > 0 {
        CancelVerdict::NotCanceled
    } else if canceled > 0 {
        CancelVerdict::Canceled
    } else {
        CancelVerdict::AllDone
    };
    tracing::debug!(%caller, %target, canceled, refused, ?verdict, "cancel");
    Ok(verdict)
}
