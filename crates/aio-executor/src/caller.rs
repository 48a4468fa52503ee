//! Per-caller context: queues, counters, quotas and the wait condvar.

use crate::config::CallerLimits;
use crate::group::Group;
use crate::request::{Arena, JobState, QueueKind, Request, Slot};
use aio_core::target::TargetTable;
use aio_core::{CallerId, JobRef};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar};

/// Block operations charged to a caller by reclaimed worker requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rusage {
    pub in_blocks: u64,
    pub out_blocks: u64,
}

/// Snapshot of one caller's counters and queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerStats {
    pub active: usize,
    pub queued: usize,
    pub queued_done: usize,
    pub buffers: usize,
    pub buffers_done: usize,
    pub pending: usize,
    pub done: usize,
    pub pending_direct: usize,
    pub done_direct: usize,
    pub readiness: usize,
    pub groups: usize,
}

pub(crate) struct CallerContext {
    pub id: CallerId,
    pub table: Arc<dyn TargetTable>,
    pub limits: CallerLimits,
    pub requests: Arena<Request>,
    pub jobs: HashMap<JobRef, Slot>,
    pub groups: Arena<Group>,
    queues: [VecDeque<Slot>; 5],
    /// Worker-routed requests currently executing.
    pub active: usize,
    /// Worker-routed and readiness requests not yet reclaimed.
    pub queued: usize,
    pub queued_done: usize,
    /// Direct-path requests not yet reclaimed.
    pub buffers: usize,
    pub buffers_done: usize,
    /// A waiter asked to be woken by the next completion or reclaim.
    pub wakeup: bool,
    pub rundown: bool,
    pub interrupted: bool,
    pub cv: Arc<Condvar>,
    pub rusage: Rusage,
}

impl CallerContext {
    pub fn new(id: CallerId, table: Arc<dyn TargetTable>, limits: CallerLimits) -> Self {
        Self {
            id,
            table,
            limits,
            requests: Arena::new(),
            jobs: HashMap::new(),
            groups: Arena::new(),
            queues: Default::default(),
            active: 0,
            queued: 0,
            queued_done: 0,
            buffers: 0,
            buffers_done: 0,
            wakeup: false,
            rundown: false,
            interrupted: false,
            cv: Arc::new(Condvar::new()),
            rusage: Rusage::default(),
        }
    }

    /// Requests counted against the outstanding quota.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.queued + self.buffers
    }

    pub fn queue(&self, kind: QueueKind) -> &VecDeque<Slot> {
        &self.queues[kind as usize]
    }

    /// Add a new request in its initial state and index it by job ref.
    pub fn admit(&mut self, req: Request) -> Slot {
        let job = req.job;
        let kind = req.state.queue();
        let slot = self.requests.insert(req);
        self.jobs.insert(job, slot);
        self.queues[kind as usize].push_back(slot);
        slot
    }

    /// Move a request to `next`, relinking it if the queue changes.
    ///
    /// Returns the previous state.
    pub fn transition(&mut self, slot: Slot, next: JobState) -> JobState {
        let req = self
            .requests
            .get_mut(slot)
            .unwrap_or_else(|| panic!("transition of vacant slot {:?}", slot));
        let prev = req.state;
        req.state = next;
        if prev.queue() != next.queue() {
            self.unlink(slot, prev.queue());
            self.queues[next.queue() as usize].push_back(slot);
        }
        prev
    }

    /// Put a request back at the head of its queue (rundown migration).
    pub fn move_to_front(&mut self, slot: Slot, next: JobState) {
        let prev = self.transition(slot, next);
        if prev.queue() != next.queue() {
            let q = &mut self.queues[next.queue() as usize];
            if let Some(pos) = q.iter().rposition(|s| *s == slot) {
                q.remove(pos);
                q.push_front(slot);
            }
        }
    }

    /// Drop a request from the arena, the job index and its queue.
    pub fn evict(&mut self, slot: Slot) -> Request {
        let req = self
            .requests
            .remove(slot)
            .unwrap_or_else(|| panic!("evict of vacant slot {:?}", slot));
        self.unlink(slot, req.state.queue());
        self.jobs.remove(&req.job);
        req
    }

    fn unlink(&mut self, slot: Slot, kind: QueueKind) {
        let q = &mut self.queues[kind as usize];
        match q.iter().position(|s| *s == slot) {
            Some(pos) => {
                q.remove(pos);
            }
            None => panic!("request {:?} missing from {:?} queue", slot, kind),
        }
    }

    /// Look up a live request by job reference.
    pub fn find(&self, job: JobRef) -> Option<(Slot, &Request)> {
        let slot = *self.jobs.get(&job)?;
        self.requests.get(slot).map(|r| (slot, r))
    }

    /// Wake waiters that asked for it.
    pub fn wake_requested(&mut self) {
        if self.wakeup {
            self.wakeup = false;
            self.cv.notify_all();
        }
    }

    pub fn stats(&self) -> CallerStats {
        CallerStats {
            active: self.active,
            queued: self.queued,
            queued_done: self.queued_done,
            buffers: self.buffers,
            buffers_done: self.buffers_done,
            pending: self.queue(QueueKind::Pending).len(),
            done: self.queue(QueueKind::Done).len(),
            pending_direct: self.queue(QueueKind::PendingDirect).len(),
            done_direct: self.queue(QueueKind::DoneDirect).len(),
            readiness: self.queue(QueueKind::Readiness).len(),
            groups: self.groups.len(),
        }
    }
}

/// Decrement a counter that must stay non-negative.
#[inline]
pub(crate) fn dec(counter: &mut usize, what: &str) {
    *counter = counter
        .checked_sub(1)
        .unwrap_or_else(|| panic!("{} counter underflow", what));
}
