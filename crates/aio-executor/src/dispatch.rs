//! Submission: validation, quota checks and routing.
//!
//! ```text
//! submit ─▶ validate ─▶ issue job ref ─┬─ Nop (batch only) ─▶ done, no record
//!                                      ├─ pollable, not ready ─▶ readiness queue
//!                                      ├─ block device, eligible ─▶ direct path
//!                                      └─ otherwise ─▶ global FIFO + worker
//! ```
//!
//! Rejections write the errno into the control block so a batch entry
//! carries its own failure. Submission never blocks on I/O; the only wait
//! is the bounded handshake when a new worker has to be created.

use crate::caller::CallerContext;
use crate::complete::{finish, release, seal_group};
use crate::direct;
use crate::group::Group;
use crate::pool;
use crate::request::{JobState, Request, Slot};
use crate::state::{Outbox, Queues, Shared};
use crate::wait;
use aio_core::readiness::ReadyWaker;
use aio_core::target::IoTarget;
use aio_core::{AioCb, AioError, AioOp, CallerId, Errno, JobRef, Opcode, Result, SigEvent};

use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

/// How `submit_batch` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Block until every queued entry has finished.
    Wait,
    /// Return once queued; the group notice (if any) reports completion.
    NoWait,
}

/// Result of a batch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries accepted, `Nop` entries included.
    pub queued: usize,
    /// Entries rejected; each carries its errno in its control block.
    pub failed: usize,
    /// `EIO` when at least one entry was rejected.
    pub error: Option<AioError>,
}

/// Record a rejection in the control block.
fn reject(cb: &AioCb, err: AioError) -> AioError {
    cb.set_job_ref(JobRef::NONE);
    cb.publish(-1, Some(err.errno()));
    err
}

/// Resolve and check the target for `opcode`.
pub(crate) fn resolve_checked(c: &CallerContext, op: &AioOp, opcode: Opcode) -> Result<Arc<dyn IoTarget>> {
    let target = c.table.resolve(op.target).ok_or(AioError::BadTarget)?;
    let permitted = match opcode {
        Opcode::Read => target.readable(),
        Opcode::Write => target.writable(),
        Opcode::Nop => true,
    };
    if !permitted {
        return Err(AioError::BadTarget);
    }
    if op.offset == -1 {
        return Err(AioError::Invalid);
    }
    if opcode != Opcode::Nop && op.nbytes > op.buf.len() {
        return Err(AioError::Invalid);
    }
    Ok(target)
}

/// Count a new request against every quota it touches and link it.
fn admit(q: &mut Queues, caller: CallerId, mut req: Request, group: Option<Slot>) -> Result<Slot> {
    let direct = req.state.is_direct();
    let c = q.caller_mut(caller)?;
    if let Some(g) = group.and_then(|g| c.groups.get_mut(g)) {
        if direct {
            g.buffered += 1;
        } else {
            g.queued += 1;
        }
    }
    req.group = group;
    if direct {
        c.buffers += 1;
    } else {
        c.queued += 1;
    }
    let slot = c.admit(req);
    q.num_queued += 1;
    Ok(slot)
}

/// Submit one request.
///
/// `group` is set for batch entries. Every entry is checked against the
/// outstanding quotas; batches also check their full size up front.
pub(crate) fn enqueue(
    shared: &Arc<Shared>,
    caller: CallerId,
    cb: &AioCb,
    opcode: Opcode,
    group: Option<Slot>,
) -> Result<JobRef> {
    cb.set_job_ref(JobRef::NONE);
    cb.publish(-1, None);
    let op = cb.op();

    let mut q = shared.queues();
    let (job, target) = match admit_checks(shared, &mut q, caller, cb, opcode, group) {
        Ok(v) => v,
        Err(e) => return Err(reject(cb, e)),
    };

    if opcode == Opcode::Nop {
        cb.set_job_ref(JobRef::NOP);
        cb.publish(0, None);
        return Ok(JobRef::NOP);
    }

    cb.set_job_ref(job);
    cb.publish(-1, Some(Errno::EINPROGRESS));

    // ── Readiness-gated targets ──
    if let (Some(pollable), Some(dir)) = (target.as_pollable(), opcode.direction()) {
        if !pollable.is_ready(dir) {
            let req = Request::new(cb.clone(), job, opcode, Arc::clone(&target), JobState::QueuedReadiness);
            let slot = admit(&mut q, caller, req, group)?;
            let weak = Arc::downgrade(shared);
            let waker = ReadyWaker::new(move || {
                if let Some(shared) = weak.upgrade() {
                    promote(&shared, caller, slot, job);
                }
            });
            if let Some(req) = q.caller_mut(caller)?.requests.get_mut(slot) {
                req.interest = Some(waker.handle());
            }
            if pollable.register_interest(dir, waker).is_none() {
                tracing::trace!(%caller, %job, "parked until target is ready");
                return Ok(job);
            }
            // became ready between the check and the registration
            drop(q);
            promote(shared, caller, slot, job);
            return Ok(job);
        }
    }

    // ── Direct path ──
    if direct::eligible(shared, q.caller(caller)?, target.as_ref(), op.nbytes) {
        return direct::start(shared, q, caller, cb, job, opcode, target, group);
    }

    // ── Worker path ──
    let req = Request::new(cb.clone(), job, opcode, target, JobState::QueuedWorker);
    let slot = admit(&mut q, caller, req, group)?;
    q.global.push_back((caller, slot));
    let (mut q, provisioned) = pool::provision(shared, q, caller);
    if let Err(e) = provisioned {
        if q.workers.count() == 0 {
            release(&mut q, shared, caller, slot)?;
            tracing::debug!(%caller, %job, error = %e, "no worker available, request rolled back");
            return Err(reject(cb, AioError::Again));
        }
        tracing::debug!(%caller, %job, error = %e, "worker creation failed, request stays queued");
    }
    tracing::trace!(%caller, %job, "queued for a worker");
    Ok(job)
}

/// Everything that can reject a submission before a record exists.
fn admit_checks(
    shared: &Shared,
    q: &mut Queues,
    caller: CallerId,
    cb: &AioCb,
    opcode: Opcode,
    group: Option<Slot>,
) -> Result<(JobRef, Arc<dyn IoTarget>)> {
    if shared.shutdown.load(Ordering::Acquire) {
        return Err(AioError::Again);
    }
    let num_queued = q.num_queued;
    let c = q.caller(caller)?;
    if c.rundown {
        return Err(AioError::NoCaller);
    }
    if group.is_none() && opcode == Opcode::Nop {
        return Err(AioError::Invalid);
    }
    // Batch entries are checked again here: the lock is dropped between them.
    if opcode != Opcode::Nop
        && (num_queued >= shared.config.max_queued || c.outstanding() >= c.limits.max_queued)
    {
        return Err(AioError::Again);
    }
    let target = resolve_checked(c, cb.op(), opcode)?;
    // A Nop consumes a job reference like any accepted entry.
    let job = q.issue_job();
    Ok((job, target))
}

/// Readiness callback: move a parked request to the worker path.
pub(crate) fn promote(shared: &Arc<Shared>, caller: CallerId, slot: Slot, job: JobRef) {
    let mut q = shared.queues();
    let Ok(c) = q.caller_mut(caller) else {
        return;
    };
    match c.requests.get(slot) {
        Some(r) if r.job == job && r.state == JobState::QueuedReadiness => {}
        // canceled, reclaimed or torn down meanwhile
        _ => return,
    }
    c.transition(slot, JobState::QueuedWorker);
    let below_cap = c.active < c.limits.max_active;
    if below_cap && q.workers.hand_off((caller, slot)) {
        tracing::trace!(%caller, %job, "ready, handed to idle worker");
        return;
    }
    q.global.push_back((caller, slot));
    let (_q, provisioned) = pool::provision(shared, q, caller);
    if let Err(e) = provisioned {
        tracing::debug!(%caller, %job, error = %e, "ready request waits for a busy worker");
    }
}

/// Submit a batch.
pub(crate) fn submit_batch(
    shared: &Arc<Shared>,
    caller: CallerId,
    mode: BatchMode,
    entries: &[Option<AioCb>],
    sigevent: SigEvent,
) -> Result<BatchOutcome> {
    let nent = entries.len();
    if nent > shared.config.listio_max {
        return Err(AioError::Invalid);
    }

    let gslot = {
        let mut q = shared.queues();
        let num_queued = q.num_queued;
        let c = q.caller_mut(caller)?;
        if nent + num_queued > shared.config.max_queued || nent + c.outstanding() > c.limits.max_queued {
            return Err(AioError::Again);
        }
        // The group notice is only honored when the caller does not wait.
        let ev = match mode {
            BatchMode::NoWait => sigevent,
            BatchMode::Wait => SigEvent::None,
        };
        c.groups.insert(Group::new(ev))
    };

    let mut queued = 0;
    let mut failed = 0;
    for cb in entries.iter().flatten() {
        match enqueue(shared, caller, cb, cb.op().opcode, Some(gslot)) {
            Ok(_) => queued += 1,
            Err(e) => {
                tracing::debug!(%caller, error = %e, "batch entry rejected");
                failed += 1;
            }
        }
    }

    let mut out = Outbox::new();
    seal_group(&mut shared.queues(), caller, gslot, &mut out)?;
    out.deliver(&*shared.notifier);

    let error = (failed > 0).then_some(AioError::Os(Errno::EIO));
    let outcome = BatchOutcome { queued, failed, error };
    if queued == 0 {
        return Ok(outcome);
    }
    if mode == BatchMode::Wait {
        wait::batch_wait(shared, caller, entries, queued)?;
    }
    Ok(outcome)
}

/// Run one transfer on the calling thread.
pub(crate) fn run_sync(shared: &Shared, caller: CallerId, cb: &AioCb, opcode: Opcode) -> Result<usize> {
    if opcode == Opcode::Nop {
        return Err(reject(cb, AioError::Invalid));
    }
    let target = {
        let q = shared.queues();
        match q.caller(caller).and_then(|c| resolve_checked(c, cb.op(), opcode)) {
            Ok(t) => t,
            Err(e) => return Err(reject(cb, e)),
        }
    };
    let transfer = pool::transfer(target.as_ref(), opcode, cb.op());
    let (result, sigpipe) = pool::settle(opcode, transfer);
    {
        let mut q = shared.queues();
        let c = q.caller_mut(caller)?;
        c.rusage.in_blocks += transfer.in_blocks;
        c.rusage.out_blocks += transfer.out_blocks;
    }
    cb.publish(result.status, result.error);
    if sigpipe {
        shared.notifier.signal(caller, aio_core::Signal::SIGPIPE);
    }
    match result.error {
        None => Ok(transfer.bytes),
        Some(e) => Err(AioError::Os(e)),
    }
}

/// Drop the guard and finish `slot` immediately with `result`.
pub(crate) fn finish_now(
    shared: &Shared,
    q: MutexGuard<'_, Queues>,
    caller: CallerId,
    slot: Slot,
    result: aio_core::IoResult,
) {
    let mut q = q;
    let mut out = Outbox::new();
    if let Err(e) = finish(&mut q, caller, slot, result, &mut out) {
        tracing::error!(%caller, error = %e, "immediate completion rejected");
    }
    drop(q);
    out.deliver(&*shared.notifier);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AioConfig, CallerLimits};
    use crate::testkit::{self, CALLER};
    use crate::Manager;
    use aio_core::{IoBuf, TargetId};
    use aio_core::worker::{WorkerBody, WorkerParking, WorkerSpawner};
    use aio_module::{FileTable, MemFile, MemSocket, ThreadSpawner};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Spawner that takes `delay` to create each worker.
    struct SlowSpawner {
        inner: ThreadSpawner,
        delay: Duration,
    }

    impl WorkerSpawner for SlowSpawner {
        fn spawn(&self, name: String, body: WorkerBody) -> Result<()> {
            thread::sleep(self.delay);
            self.inner.spawn(name, body)
        }

        fn new_parking(&self) -> Box<dyn WorkerParking> {
            self.inner.new_parking()
        }
    }

    fn file_table(data: Vec<u8>) -> (Arc<FileTable>, Arc<MemFile>, TargetId) {
        let table = Arc::new(FileTable::new());
        let file = Arc::new(MemFile::new(data));
        let id = table.install(file.clone());
        (table, file, id)
    }

    #[test]
    fn round_trip_reads_sum_to_file_size() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let data: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
        let (table, _file, fd) = file_table(data.clone());
        mgr.register_caller(CALLER, table).unwrap();

        let cbs: Vec<AioCb> = (0..8)
            .map(|i| AioOp::read(fd, IoBuf::new(512), i * 512).into_cb())
            .collect();
        let mut last = JobRef::NONE;
        for cb in &cbs {
            let job = mgr.submit(CALLER, cb).unwrap();
            assert!(job > last);
            last = job;
        }
        let mut total = 0;
        for cb in &cbs {
            mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
            let res = mgr.reclaim(CALLER, cb).unwrap();
            total += res.status;
            let off = cb.op().offset as usize;
            assert_eq!(cb.op().buf.to_vec().unwrap(), data[off..off + 512].to_vec());
        }
        assert_eq!(total, 4096);
        let s = mgr.caller_stats(CALLER).unwrap();
        assert_eq!((s.queued, s.queued_done, s.active), (0, 0, 0));
        assert_eq!(mgr.stats().queued, 0);
    }

    #[test]
    fn caller_quota_rejects_second_request() {
        let (mgr, _n) = testkit::manager(AioConfig::new().max_workers(1));
        let (table, file, fd) = file_table(vec![0; 64]);
        file.hold();
        mgr.register_caller_with(CALLER, table, CallerLimits::default().max_queued(1))
            .unwrap();

        let a = AioOp::read(fd, IoBuf::new(8), 0).into_cb();
        let b = AioOp::read(fd, IoBuf::new(8), 8).into_cb();
        mgr.submit(CALLER, &a).unwrap();
        assert_eq!(mgr.submit(CALLER, &b), Err(AioError::Again));
        assert_eq!(b.error(), Some(Errno::EAGAIN));
        assert_eq!(b.job_ref(), JobRef::NONE);

        file.release();
        mgr.suspend(CALLER, &[Some(a.clone())], Some(Duration::from_secs(5))).unwrap();
        mgr.reclaim(CALLER, &a).unwrap();
        mgr.submit(CALLER, &b).unwrap();
    }

    #[test]
    fn validation_errors_land_in_the_control_block() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let table = Arc::new(FileTable::new());
        let ro = table.install(Arc::new(MemFile::new(vec![0; 16]).read_only()));
        let wo = table.install(Arc::new(MemFile::new(vec![0; 16]).write_only()));
        mgr.register_caller(CALLER, table).unwrap();

        let bad_fd = AioOp::read(TargetId(99), IoBuf::new(4), 0).into_cb();
        assert_eq!(mgr.submit(CALLER, &bad_fd), Err(AioError::BadTarget));
        assert_eq!(bad_fd.error(), Some(Errno::EBADF));

        let write_ro = AioOp::write(ro, IoBuf::new(4), 0).into_cb();
        assert_eq!(mgr.submit(CALLER, &write_ro), Err(AioError::BadTarget));
        let read_wo = AioOp::read(wo, IoBuf::new(4), 0).into_cb();
        assert_eq!(mgr.submit(CALLER, &read_wo), Err(AioError::BadTarget));

        let bad_off = AioOp::read(ro, IoBuf::new(4), -1).into_cb();
        assert_eq!(mgr.submit(CALLER, &bad_off), Err(AioError::Invalid));
        assert_eq!(bad_off.error(), Some(Errno::EINVAL));

        let too_long = AioOp::read(ro, IoBuf::new(4), 0).nbytes(8).into_cb();
        assert_eq!(mgr.submit(CALLER, &too_long), Err(AioError::Invalid));

        let nop = AioOp::nop(ro).into_cb();
        assert_eq!(mgr.submit(CALLER, &nop), Err(AioError::Invalid));
        assert_eq!(mgr.caller_stats(CALLER).unwrap().queued, 0);
    }

    #[test]
    fn submit_read_forces_the_opcode() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let (table, file, fd) = file_table(b"abcd".to_vec());
        mgr.register_caller(CALLER, table).unwrap();
        let cb = AioOp::write(fd, IoBuf::new(4), 0).into_cb();
        mgr.submit_read(CALLER, &cb).unwrap();
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mgr.reclaim(CALLER, &cb).unwrap().status, 4);
        assert_eq!(cb.op().buf.to_vec().unwrap(), b"abcd".to_vec());
        assert_eq!(file.contents(), b"abcd".to_vec());
    }

    #[test]
    fn batch_with_invalid_entries_reports_eio() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let (table, file, fd) = file_table(vec![0; 64]);
        mgr.register_caller(CALLER, table).unwrap();

        let good = [
            AioOp::write(fd, IoBuf::from_vec(vec![1; 8]), 0).into_cb(),
            AioOp::write(fd, IoBuf::from_vec(vec![2; 8]), 8).into_cb(),
        ];
        let bad = [
            AioOp::write(TargetId(42), IoBuf::new(8), 0).into_cb(),
            AioOp::write(fd, IoBuf::new(8), -1).into_cb(),
        ];
        let entries = vec![
            Some(good[0].clone()),
            Some(bad[0].clone()),
            None,
            Some(good[1].clone()),
            Some(bad[1].clone()),
        ];
        let out = mgr
            .submit_batch(CALLER, BatchMode::Wait, &entries, SigEvent::None)
            .unwrap();
        assert_eq!(out.queued, 2);
        assert_eq!(out.failed, 2);
        assert_eq!(out.error, Some(AioError::Os(Errno::EIO)));
        assert_eq!(bad[0].error(), Some(Errno::EBADF));
        assert_eq!(bad[1].error(), Some(Errno::EINVAL));

        for cb in &good {
            assert_eq!(mgr.reclaim(CALLER, cb).unwrap(), aio_core::IoResult::ok(8));
        }
        assert_eq!(&file.contents()[..16], &[[1u8; 8], [2u8; 8]].concat()[..]);
        assert_eq!(mgr.caller_stats(CALLER).unwrap().groups, 0);
    }

    #[test]
    fn batch_nop_counts_as_queued_and_consumes_a_job_ref() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let (table, _file, fd) = file_table(vec![0; 8]);
        mgr.register_caller(CALLER, table).unwrap();

        let before = AioOp::read(fd, IoBuf::new(4), 0).into_cb();
        let nop = AioOp::nop(fd).into_cb();
        let after = AioOp::read(fd, IoBuf::new(4), 4).into_cb();
        let entries = vec![Some(before.clone()), Some(nop.clone()), Some(after.clone())];
        let out = mgr
            .submit_batch(CALLER, BatchMode::Wait, &entries, SigEvent::None)
            .unwrap();
        assert_eq!(out, BatchOutcome { queued: 3, failed: 0, error: None });
        assert_eq!(nop.job_ref(), JobRef::NOP);
        assert_eq!(nop.status(), 0);
        assert_eq!(after.job_ref().0, before.job_ref().0 + 2);
        mgr.reclaim(CALLER, &before).unwrap();
        mgr.reclaim(CALLER, &after).unwrap();
    }

    #[test]
    fn batch_limits() {
        let (mgr, _n) = testkit::manager(AioConfig::new().listio_max(2));
        let (table, _file, fd) = file_table(vec![0; 8]);
        mgr.register_caller_with(CALLER, table, CallerLimits::default().max_queued(2))
            .unwrap();
        let cb = || Some(AioOp::read(fd, IoBuf::new(1), 0).into_cb());

        let three = vec![cb(), cb(), cb()];
        assert_eq!(
            mgr.submit_batch(CALLER, BatchMode::NoWait, &three, SigEvent::None),
            Err(AioError::Invalid)
        );
        let empty: Vec<Option<AioCb>> = vec![None, None];
        assert_eq!(
            mgr.submit_batch(CALLER, BatchMode::Wait, &empty, SigEvent::None),
            Ok(BatchOutcome { queued: 0, failed: 0, error: None })
        );

        let first = AioOp::read(fd, IoBuf::new(1), 0).into_cb();
        mgr.submit(CALLER, &first).unwrap();
        let two = vec![cb(), cb()];
        assert_eq!(
            mgr.submit_batch(CALLER, BatchMode::NoWait, &two, SigEvent::None),
            Err(AioError::Again)
        );
    }

    #[test]
    fn socket_not_ready_parks_then_runs() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let table = Arc::new(FileTable::new());
        let sock = Arc::new(MemSocket::new());
        let fd = table.install(sock.clone());
        mgr.register_caller(CALLER, table).unwrap();

        let cb = AioOp::read(fd, IoBuf::new(5), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        assert_eq!(mgr.caller_stats(CALLER).unwrap().readiness, 1);
        assert_eq!(mgr.poll_error(CALLER, &cb), Ok(Some(Errno::EINPROGRESS)));

        sock.feed(b"hello");
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mgr.reclaim(CALLER, &cb).unwrap().status, 5);
        assert_eq!(cb.op().buf.to_vec().unwrap(), b"hello".to_vec());
        assert_eq!(mgr.caller_stats(CALLER).unwrap().readiness, 0);
    }

    #[test]
    fn ready_socket_goes_straight_to_a_worker() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let table = Arc::new(FileTable::new());
        let sock = Arc::new(MemSocket::new());
        let fd = table.install(sock.clone());
        mgr.register_caller(CALLER, table).unwrap();

        let cb = AioOp::write(fd, IoBuf::from_vec(b"ping".to_vec()), 0).into_cb();
        mgr.submit(CALLER, &cb).unwrap();
        mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(mgr.reclaim(CALLER, &cb).unwrap().status, 4);
        assert_eq!(sock.take_written(), b"ping".to_vec());
    }

    #[test]
    fn no_worker_at_all_rolls_back() {
        let (mgr, _n) = testkit::manager_with_spawner(
            AioConfig::new(),
            Arc::new(aio_module::ThreadSpawner::new().max_threads(0)),
        );
        let (table, _file, fd) = file_table(vec![0; 8]);
        mgr.register_caller(CALLER, table).unwrap();
        let cb = AioOp::read(fd, IoBuf::new(4), 0).into_cb();
        assert_eq!(mgr.submit(CALLER, &cb), Err(AioError::Again));
        assert_eq!(cb.error(), Some(Errno::EAGAIN));
        let s = mgr.caller_stats(CALLER).unwrap();
        assert_eq!((s.queued, s.pending), (0, 0));
        assert_eq!(mgr.stats().queued, 0);
        assert_eq!(mgr.stats().global_queue, 0);
    }

    #[test]
    fn read_sync_runs_inline_and_charges() {
        let (mgr, _n) = testkit::manager(AioConfig::new());
        let (table, _file, fd) = file_table(b"sync".to_vec());
        mgr.register_caller(CALLER, table).unwrap();
        let cb = AioOp::read(fd, IoBuf::new(4), 0).into_cb();
        assert_eq!(mgr.read_sync(CALLER, &cb), Ok(4));
        assert_eq!(cb.status(), 4);
        assert_eq!(mgr.rusage(CALLER).unwrap().in_blocks, 1);
        assert_eq!(mgr.stats().workers, 0);

        let wr = AioOp::write(fd, IoBuf::from_vec(b"SY".to_vec()), 0).into_cb();
        assert_eq!(mgr.write_sync(CALLER, &wr), Ok(2));
        assert_eq!(mgr.rusage(CALLER).unwrap().out_blocks, 1);
    }
    #[test]
    fn submit_does_not_wait_on_a_buffer_in_use() {
        let (mgr, _n) = testkit::manager(AioConfig::new().max_workers(1));
        let (table, file, fd) = file_table(vec![0; 64]);
        mgr.register_caller(CALLER, table).unwrap();
        let other = CallerId(2);
        mgr.register_caller(other, Arc::new(FileTable::new())).unwrap();

        file.hold();
        let buf = IoBuf::from_vec(vec![7; 8]);
        let a = AioOp::write(fd, buf.clone(), 0).into_cb();
        mgr.submit(CALLER, &a).unwrap();
        assert!(file.wait_started(1, Duration::from_secs(5)));

        let mgr = Arc::new(mgr);
        let (tx, rx) = mpsc::channel();
        let submitter = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                let b = AioOp::write(fd, buf, 8).into_cb();
                tx.send(mgr.submit(CALLER, &b).is_ok()).unwrap();
                b
            })
        };
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(true));
        assert!(mgr.caller_stats(other).is_ok());
        let b = submitter.join().unwrap();

        file.release();
        for cb in [&a, &b] {
            mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
            assert_eq!(mgr.reclaim(CALLER, cb).unwrap(), aio_core::IoResult::ok(8));
        }
        assert_eq!(&file.contents()[..16], &[7u8; 16][..]);
    }

    #[test]
    fn batch_entries_recheck_the_caller_quota() {
        let spawner = SlowSpawner {
            inner: ThreadSpawner::new(),
            delay: Duration::from_millis(300),
        };
        let (mgr, _n) = testkit::manager_with_spawner(AioConfig::new().max_workers(1), Arc::new(spawner));
        let (table, file, fd) = file_table(vec![0; 64]);
        file.hold();
        mgr.register_caller_with(CALLER, table, CallerLimits::default().max_queued(2))
            .unwrap();

        let mgr = Arc::new(mgr);
        let batch = [
            AioOp::read(fd, IoBuf::new(8), 0).into_cb(),
            AioOp::read(fd, IoBuf::new(8), 8).into_cb(),
        ];
        let batcher = {
            let mgr = Arc::clone(&mgr);
            let entries: Vec<Option<AioCb>> = batch.iter().cloned().map(Some).collect();
            thread::spawn(move || mgr.submit_batch(CALLER, BatchMode::NoWait, &entries, SigEvent::None))
        };
        // lands while the first entry is still creating its worker
        thread::sleep(Duration::from_millis(100));
        let single = AioOp::read(fd, IoBuf::new(8), 16).into_cb();
        assert!(mgr.submit(CALLER, &single).is_ok());

        let out = batcher.join().unwrap().unwrap();
        assert_eq!(out, BatchOutcome { queued: 1, failed: 1, error: Some(AioError::Os(Errno::EIO)) });
        assert_eq!(batch[1].error(), Some(Errno::EAGAIN));
        assert_eq!(mgr.caller_stats(CALLER).unwrap().queued, 2);
        assert_eq!(mgr.stats().queued, 2);

        file.release();
        for cb in [&batch[0], &single] {
            mgr.suspend(CALLER, &[Some(cb.clone())], Some(Duration::from_secs(5))).unwrap();
            mgr.reclaim(CALLER, cb).unwrap();
        }
    }

    #[test]
    fn global_quota_spans_callers() {
        let (mgr, _n) = testkit::manager(AioConfig::new().max_queued(2));
        let (table, file, fd) = file_table(vec![0; 64]);
        file.hold();
        mgr.register_caller(CALLER, table.clone()).unwrap();
        let other = CallerId(2);
        mgr.register_caller(other, table).unwrap();

        let a = AioOp::read(fd, IoBuf::new(8), 0).into_cb();
        let b = AioOp::read(fd, IoBuf::new(8), 8).into_cb();
        let c = AioOp::read(fd, IoBuf::new(8), 16).into_cb();
        mgr.submit(CALLER, &a).unwrap();
        mgr.submit(other, &b).unwrap();
        assert_eq!(mgr.submit(other, &c), Err(AioError::Again));
        assert_eq!(c.error(), Some(Errno::EAGAIN));
        let one = vec![Some(AioOp::read(fd, IoBuf::new(8), 24).into_cb())];
        assert_eq!(
            mgr.submit_batch(CALLER, BatchMode::NoWait, &one, SigEvent::None),
            Err(AioError::Again)
        );
        assert_eq!(mgr.caller_stats(CALLER).unwrap().queued, 1);

        file.release();
        mgr.suspend(CALLER, &[Some(a.clone())], Some(Duration::from_secs(5))).unwrap();
        mgr.reclaim(CALLER, &a).unwrap();
        mgr.submit(other, &c).unwrap();
    }
}
