//! Worker pool.
//!
//! Workers are created on demand, up to `max_workers`, and park when idle.
//! An idle worker above `target_workers` exits after `worker_lifetime`
//! without work.
//!
//! ```text
//! loop {
//!     1. Mark self active
//!     2. Take jobs: own hint queue first, then the oldest global job whose
//!        caller is below its active cap
//!     3. For each job: adopt caller, run the blocking transfer unlocked,
//!        finish it, deliver notices
//!     4. Mark self free; park for the lifetime
//!     5. On timeout: exit if surplus and nothing is queued
//! }
//! ```

use crate::caller::dec;
use crate::complete::finish;
use crate::request::{Charge, JobState, Slot};
use crate::state::{JobKey, Outbox, Queues, Shared, WorkerId, WorkerSlot};
use aio_core::target::{IoTarget, Transfer};
use aio_core::worker::WorkerParking;
use aio_core::{AioCb, AioError, AioOp, CallerId, Errno, IoResult, JobRef, Opcode, Result, Signal};

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, MutexGuard};

/// Make sure a worker will look at the queue: wake an idle one, or create
/// one if the pool and the caller's active cap allow it.
///
/// Failing to create a worker is reported but leaves the queue untouched.
pub(crate) fn provision<'a>(
    shared: &'a Arc<Shared>,
    mut q: MutexGuard<'a, Queues>,
    caller: CallerId,
) -> (MutexGuard<'a, Queues>, Result<()>) {
    if q.workers.wake_free().is_some() {
        return (q, Ok(()));
    }
    let Some((active, max_active)) = q.callers.get(&caller).map(|c| (c.active, c.limits.max_active)) else {
        return (q, Err(AioError::NoCaller));
    };
    let resv = q.workers.resv;
    if resv + q.workers.count() >= shared.config.max_workers || active + resv >= max_active {
        return (q, Ok(()));
    }

    q.workers.resv += 1;
    let id = q.workers.next_id;
    q.workers.next_id += 1;
    drop(q);
    let spawned = spawn_worker(shared, id);
    let mut q = shared.queues();
    dec(&mut q.workers.resv, "worker reservations");
    if spawned.is_ok() {
        q.workers.wake_free();
    }
    (q, spawned)
}

fn spawn_worker(shared: &Arc<Shared>, id: WorkerId) -> Result<()> {
    let parking: Arc<dyn WorkerParking> = Arc::from(shared.spawner.new_parking());
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let worker_shared = Arc::clone(shared);
    if let Err(e) = shared.spawner.spawn(
        format!("aio-worker-{}", id),
        Box::new(move || worker_main(worker_shared, id, parking, ready_tx)),
    ) {
        tracing::warn!(worker = id, error = %e, "worker creation failed");
        return Err(e);
    }
    match ready_rx.recv_timeout(shared.config.worker_start_timeout) {
        Ok(()) => Ok(()),
        Err(_) => {
            tracing::warn!(worker = id, "worker did not report ready");
            Err(AioError::Again)
        }
    }
}

/// A job taken off a queue, with what the transfer needs.
pub(crate) struct RunJob {
    pub caller: CallerId,
    pub slot: Slot,
    pub job: JobRef,
    pub cb: AioCb,
    pub opcode: Opcode,
    pub target: Arc<dyn IoTarget>,
}

/// Outcome of one worker transfer after the short-I/O policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Executed {
    pub result: IoResult,
    pub charge: Charge,
    pub sigpipe: bool,
}

fn worker_main(shared: Arc<Shared>, id: WorkerId, parking: Arc<dyn WorkerParking>, ready: SyncSender<()>) {
    {
        let mut q = shared.queues();
        if shared.shutdown.load(Ordering::Acquire) || q.workers.count() >= shared.config.max_workers {
            tracing::debug!(worker = id, "surplus worker exiting before start");
            return;
        }
        q.workers.slots.insert(
            id,
            WorkerSlot {
                parking: Arc::clone(&parking),
                hint: VecDeque::new(),
                free: true,
            },
        );
        q.workers.free.push_front(id);
    }
    let _ = ready.send(());
    tracing::debug!(worker = id, "worker started");

    let mut adopted: Option<CallerId> = None;
    loop {
        let mut q = shared.queues();
        if let Some(slot) = q.workers.slots.get_mut(&id) {
            if slot.free {
                slot.free = false;
                q.workers.free.retain(|w| *w != id);
            }
        }

        while let Some(key) = select_job(&mut q, id) {
            let Some(run) = start_job(&mut q, key) else {
                continue;
            };
            drop(q);
            if adopted != Some(run.caller) {
                if let Some(prev) = adopted.take() {
                    shared.exec.release(prev);
                }
                shared.exec.adopt(run.caller);
                adopted = Some(run.caller);
            }
            let executed = execute(&run);
            let mut out = Outbox::new();
            q = shared.queues();
            finish_job(&mut q, &run, executed, &mut out);
            if !out.is_empty() {
                drop(q);
                out.deliver(&*shared.notifier);
                q = shared.queues();
            }
        }

        if let Some(slot) = q.workers.slots.get_mut(&id) {
            slot.free = true;
        }
        q.workers.free.push_front(id);
        let shutdown = shared.shutdown.load(Ordering::Acquire);
        if shutdown {
            deregister(&mut q, id);
        }
        drop(q);
        if let Some(prev) = adopted.take() {
            shared.exec.release(prev);
        }
        if shutdown {
            tracing::debug!(worker = id, "worker stopped");
            return;
        }

        if !parking.park(Some(shared.config.worker_lifetime)) {
            let mut q = shared.queues();
            let idle = q
                .workers
                .slots
                .get(&id)
                .is_some_and(|s| s.free && s.hint.is_empty());
            if idle && q.global.is_empty() && q.workers.count() > shared.config.target_workers {
                deregister(&mut q, id);
                tracing::debug!(worker = id, "idle worker exiting");
                return;
            }
        }
    }
}

fn deregister(q: &mut Queues, id: WorkerId) {
    q.workers.slots.remove(&id);
    q.workers.free.retain(|w| *w != id);
}

/// Next job for worker `id`: its hint queue first, then the oldest global
/// job whose caller is below its active cap. Callers in rundown are skipped.
pub(crate) fn select_job(q: &mut Queues, id: WorkerId) -> Option<JobKey> {
    let callers = &q.callers;
    if let Some(slot) = q.workers.slots.get_mut(&id) {
        let runnable = |caller: &CallerId| callers.get(caller).is_some_and(|c| !c.rundown);
        if let Some(pos) = slot.hint.iter().position(|(c, _)| runnable(c)) {
            return slot.hint.remove(pos);
        }
    }
    let pos = q.global.iter().position(|(c, _)| {
        callers
            .get(c)
            .is_some_and(|c| !c.rundown && c.active < c.limits.max_active)
    })?;
    q.global.remove(pos)
}

/// Mark a selected job running. `None` if it went away meanwhile.
pub(crate) fn start_job(q: &mut Queues, (caller, slot): JobKey) -> Option<RunJob> {
    let c = q.callers.get_mut(&caller)?;
    let req = c.requests.get(slot)?;
    if req.state != JobState::QueuedWorker {
        return None;
    }
    let run = RunJob {
        caller,
        slot,
        job: req.job,
        cb: req.cb.clone(),
        opcode: req.opcode,
        target: Arc::clone(&req.target),
    };
    c.transition(slot, JobState::Running);
    c.active += 1;
    Some(run)
}

/// Blocking transfer into or out of the request's buffer.
///
/// The buffer is pinned for the duration, so the buffer lock is not held
/// while `sync_io` blocks.
pub(crate) fn transfer(target: &dyn IoTarget, opcode: Opcode, op: &AioOp) -> Transfer {
    let mut buf = match op.buf.pin() {
        Ok(buf) => buf,
        // another transfer owns the buffer
        Err(errno) => return Transfer::failed(0, errno),
    };
    let n = op.nbytes.min(buf.len());
    let t = target.sync_io(opcode, &mut buf.as_mut_slice()[..n], op.offset);
    buf.unpin();
    t
}

/// Short-I/O policy.
///
/// A transfer that made progress and was then stopped by an interrupt or
/// would-block reports success with the partial count. A write that hit
/// a broken pipe also raises `SIGPIPE` for the caller.
pub(crate) fn settle(opcode: Opcode, t: Transfer) -> (IoResult, bool) {
    let sigpipe = opcode == Opcode::Write && t.error == Some(Errno::EPIPE);
    let error = match t.error {
        Some(e) if t.bytes > 0 && (e == Errno::EINTR || e == Errno::EWOULDBLOCK) => None,
        other => other,
    };
    let result = match error {
        Some(e) => IoResult::failed(e),
        None => IoResult::ok(t.bytes),
    };
    (result, sigpipe)
}

fn execute(run: &RunJob) -> Executed {
    let t = transfer(run.target.as_ref(), run.opcode, run.cb.op());
    let (result, sigpipe) = settle(run.opcode, t);
    tracing::trace!(caller = %run.caller, job = %run.job, bytes = t.bytes, error = ?t.error, "transfer done");
    Executed {
        result,
        charge: Charge {
            in_blocks: t.in_blocks,
            out_blocks: t.out_blocks,
        },
        sigpipe,
    }
}

pub(crate) fn finish_job(q: &mut Queues, run: &RunJob, executed: Executed, out: &mut Outbox) {
    let Some(c) = q.callers.get_mut(&run.caller) else {
        panic!("{} vanished while {} was running", run.caller, run.job);
    };
    dec(&mut c.active, "caller active");
    if let Some(req) = c.requests.get_mut(run.slot) {
        req.charge = executed.charge;
    }
    if executed.sigpipe {
        out.signal(run.caller, Signal::SIGPIPE);
    }
    if let Err(e) = finish(q, run.caller, run.slot, executed.result, out) {
        tracing::error!(caller = %run.caller, job = %run.job, error = %e, "worker completion rejected");
    }
}

/// Stop accepting work and release idle workers.
pub(crate) fn shutdown(shared: &Shared) {
    shared.shutdown.store(true, Ordering::Release);
    let q = shared.queues();
    for slot in q.workers.slots.values() {
        slot.parking.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::CallerContext;
    use crate::config::{AioConfig, CallerLimits};
    use crate::request::Request;
    use crate::testkit::{self, CALLER};
    use aio_core::{AioOp, IoBuf, TargetId};
    use aio_module::mem_file::Fault;
    use aio_module::{CondvarParking, FileTable, MemFile, MemSocket, Notification};
    use std::time::Duration;

    const OTHER: CallerId = CallerId(2);

    fn queued(q: &mut Queues, caller: CallerId) -> Slot {
        let job = q.issue_job();
        let cb = AioOp::read(TargetId(3), IoBuf::new(1), 0).into_cb();
        let req = Request::new(cb, job, Opcode::Read, Arc::new(MemFile::new(vec![0])), JobState::QueuedWorker);
        let slot = q.callers.get_mut(&caller).unwrap().admit(req);
        q.global.push_back((caller, slot));
        slot
    }

    fn idle_worker(q: &mut Queues, id: WorkerId) {
        q.workers.slots.insert(
            id,
            WorkerSlot {
                parking: Arc::new(CondvarParking::new()),
                hint: VecDeque::new(),
                free: false,
            },
        );
    }

    #[test]
    fn selection_skips_callers_at_their_active_cap() {
        let mut q = Queues::new();
        let limits = CallerLimits::default().max_active(1);
        q.callers
            .insert(CALLER, CallerContext::new(CALLER, Arc::new(FileTable::new()), limits));
        q.callers
            .insert(OTHER, CallerContext::new(OTHER, Arc::new(FileTable::new()), limits));
        idle_worker(&mut q, 0);

        let a1 = queued(&mut q, CALLER);
        let a2 = queued(&mut q, CALLER);
        let b1 = queued(&mut q, OTHER);

        assert_eq!(select_job(&mut q, 0), Some((CALLER, a1)));
        start_job(&mut q, (CALLER, a1)).unwrap();
        // CALLER is at its cap: its older job is passed over
        assert_eq!(select_job(&mut q, 0), Some((OTHER, b1)));
        start_job(&mut q, (OTHER, b1)).unwrap();
        assert_eq!(select_job(&mut q, 0), None);
        assert_eq!(q.global.front(), Some(&(CALLER, a2)));
    }

    #[test]
    fn hint_queue_comes_first() {
        let mut q = Queues::new();
        q.callers.insert(
            CALLER,
            CallerContext::new(CALLER, Arc::new(FileTable::new()), CallerLimits::default()),
        );
        idle_worker(&mut q, 7);
        let g = queued(&mut q, CALLER);
        let h = queued(&mut q, CALLER);
        q.global.retain(|k| *k != (CALLER, h));
        q.workers.slots.get_mut(&7).unwrap().hint.push_back((CALLER, h));
        assert_eq!(select_job(&mut q, 7), Some((CALLER, h)));
        assert_eq!(select_job(&mut q, 7), Some((CALLER, g)));
    }

    #[test]
    fn short_transfer_policy() {
        let interrupted = Transfer::failed(10, Errno::EINTR);
        assert_eq!(settle(Opcode::Read, interrupted), (IoResult::ok(10), false));

        let would_block = Transfer::failed(3, Errno::EWOULDBLOCK);
        assert_eq!(settle(Opcode::Write, would_block), (IoResult::ok(3), false));

        let nothing = Transfer::failed(0, Errno::EINTR);
        assert_eq!(settle(Opcode::Read, nothing), (IoResult::failed(Errno::EINTR), false));

        let io = Transfer::failed(10, Errno::EIO);
        assert_eq!(settle(Opcode::Read, io), (IoResult::failed(Errno::EIO), false));

        let pipe = Transfer::failed(0, Errno::EPIPE);
        assert_eq!(settle(Opcode::Write, pipe), (IoResult::failed(Errno::EPIPE), true));
        assert!(!settle(Opcode::Read, pipe).1);
    }

    #[test]
    fn partial_read_after_interrupt_reports_bytes() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let table = Arc::new(FileTable::new());
        let file = Arc::new(MemFile::new(vec![9; 64]));
        file.inject(Fault { bytes: 10, errno: Errno::EINTR });
        let fd = table.install(file);
        mgr.register_caller(CALLER, table).unwrap();

        let cb = AioOp::read(fd, IoBuf::new(64), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mgr.reclaim(CALLER, &cb).unwrap(), IoResult::ok(10));
    }

    #[test]
    fn broken_pipe_raises_sigpipe() {
        let (mgr, notifier) = testkit::manager(AioConfig::new());
        let table = Arc::new(FileTable::new());
        let sock = Arc::new(MemSocket::new());
        sock.close_peer();
        let fd = table.install(sock);
        mgr.register_caller(CALLER, table).unwrap();

        let cb = AioOp::write(fd, IoBuf::from_vec(vec![1; 4]), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mgr.reclaim(CALLER, &cb).unwrap(), IoResult::failed(Errno::EPIPE));
        assert!(testkit::eventually(Duration::from_secs(5), || !notifier.is_empty()));
        assert_eq!(
            notifier.drain(),
            vec![Notification::Signal { caller: CALLER, sig: Signal::SIGPIPE }]
        );
    }

    #[test]
    fn surplus_idle_worker_exits() {
        let (mgr, _n) = testkit::manager(
            AioConfig::new()
                .target_workers(0)
                .worker_lifetime(Duration::from_millis(20)),
        );
        let table = Arc::new(FileTable::new());
        let fd = table.install(Arc::new(MemFile::new(vec![0; 8])));
        mgr.register_caller(CALLER, table).unwrap();

        let cb = AioOp::read(fd, IoBuf::new(8), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        assert_eq!(mgr.stats().workers, 1);
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert!(testkit::eventually(Duration::from_secs(5), || mgr.stats().workers == 0));
        mgr.reclaim(CALLER, &cb).unwrap();
    }

    #[test]
    fn workers_at_target_stay() {
        let (mgr, _n) = testkit::manager(
            AioConfig::new()
                .target_workers(1)
                .worker_lifetime(Duration::from_millis(10)),
        );
        let table = Arc::new(FileTable::new());
        let fd = table.install(Arc::new(MemFile::new(vec![0; 8])));
        mgr.register_caller(CALLER, table).unwrap();
        let cb = AioOp::read(fd, IoBuf::new(8), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(mgr.stats().workers, 1);
    }

    #[test]
    fn pool_never_exceeds_max_workers() {
        let (mgr, _n) = testkit::manager(AioConfig::new().max_workers(2));
        let table = Arc::new(FileTable::new());
        let file = Arc::new(MemFile::new(vec![0; 64]));
        file.hold();
        let fd = table.install(file.clone());
        mgr.register_caller(CALLER, table).unwrap();

        let cbs: Vec<AioCb> = (0..5)
            .map(|i| AioOp::read(fd, IoBuf::new(8), i * 8).into_cb())
            .collect();
        for cb in &cbs {
            mgr.submit(CALLER, cb).unwrap();
        }
        assert!(file.wait_started(2, Duration::from_secs(5)));
        let stats = mgr.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.global_queue, 3);
        assert_eq!(mgr.caller_stats(CALLER).unwrap().active, 2);

        file.release();
        for cb in &cbs {
            mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
            mgr.reclaim(CALLER, cb).unwrap();
        }
        assert_eq!(mgr.stats().queued, 0);
    }
}
