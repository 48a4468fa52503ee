//! Manager-wide state and its locks.
//!
//! ```text
//! Shared
//!   ├── queues: Mutex<Queues>        callers, global FIFO, worker set, totals
//!   └── direct: Mutex<DirectLedger>  global direct-path buffer count
//! ```
//!
//! Lock order is `queues` then `direct`. Neither lock is held while a
//! collaborator that may block or call back is invoked (device strategy,
//! worker transfers, notifier delivery). Notices produced under the lock
//! are collected in an `Outbox` and delivered after it is dropped.

use crate::caller::CallerContext;
use crate::config::AioConfig;
use crate::request::Slot;
use aio_core::notifier::Notifier;
use aio_core::worker::{ExecContext, WorkerParking, WorkerSpawner};
use aio_core::{AioError, CallerId, JobRef, SigEvent, Signal};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) type WorkerId = u64;

/// A queued worker job: owning caller and request slot.
pub(crate) type JobKey = (CallerId, Slot);

pub(crate) struct WorkerSlot {
    pub parking: Arc<dyn WorkerParking>,
    /// Jobs handed to this worker directly by readiness promotion.
    pub hint: VecDeque<JobKey>,
    pub free: bool,
}

#[derive(Default)]
pub(crate) struct WorkerSet {
    pub slots: HashMap<WorkerId, WorkerSlot>,
    /// Idle workers, most recently freed first.
    pub free: VecDeque<WorkerId>,
    /// Creations in progress.
    pub resv: usize,
    pub next_id: WorkerId,
}

impl WorkerSet {
    #[inline]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Take an idle worker off the free list and wake it.
    pub fn wake_free(&mut self) -> Option<WorkerId> {
        let id = self.free.pop_front()?;
        let slot = self.slots.get_mut(&id)?;
        slot.free = false;
        slot.parking.wake_one();
        Some(id)
    }

    /// Give `key` to an idle worker's hint queue and wake it.
    pub fn hand_off(&mut self, key: JobKey) -> bool {
        let Some(id) = self.free.pop_front() else {
            return false;
        };
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.free = false;
                slot.hint.push_back(key);
                slot.parking.wake_one();
                true
            }
            None => false,
        }
    }

    /// Drop a queued job from every hint queue.
    pub fn forget(&mut self, key: JobKey) -> bool {
        for slot in self.slots.values_mut() {
            if let Some(pos) = slot.hint.iter().position(|k| *k == key) {
                slot.hint.remove(pos);
                return true;
            }
        }
        false
    }
}

pub(crate) struct Queues {
    pub callers: HashMap<CallerId, CallerContext>,
    /// Worker-routed requests across all callers, FIFO.
    pub global: VecDeque<JobKey>,
    pub workers: WorkerSet,
    /// Outstanding requests across all callers (worker, readiness and direct).
    pub num_queued: usize,
    pub next_job: JobRef,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            callers: HashMap::new(),
            global: VecDeque::new(),
            workers: WorkerSet::default(),
            num_queued: 0,
            next_job: JobRef::FIRST,
        }
    }

    /// Issue the next job reference.
    pub fn issue_job(&mut self) -> JobRef {
        let job = self.next_job;
        self.next_job = job.next();
        job
    }

    pub fn caller(&self, id: CallerId) -> Result<&CallerContext, AioError> {
        self.callers.get(&id).ok_or(AioError::NoCaller)
    }

    pub fn caller_mut(&mut self, id: CallerId) -> Result<&mut CallerContext, AioError> {
        self.callers.get_mut(&id).ok_or(AioError::NoCaller)
    }

    /// Remove a queued worker job from the global FIFO or a hint queue.
    pub fn dequeue(&mut self, key: JobKey) {
        if let Some(pos) = self.global.iter().position(|k| *k == key) {
            self.global.remove(pos);
        } else {
            self.workers.forget(key);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DirectLedger {
    /// Direct-path requests accepted and not yet reclaimed.
    pub num_buffers: usize,
}

pub(crate) struct Shared {
    pub config: AioConfig,
    pub queues: Mutex<Queues>,
    pub direct: Mutex<DirectLedger>,
    pub spawner: Arc<dyn WorkerSpawner>,
    pub notifier: Arc<dyn Notifier>,
    pub exec: Arc<dyn ExecContext>,
    pub shutdown: AtomicBool,
}

impl Shared {
    #[inline]
    pub fn queues(&self) -> MutexGuard<'_, Queues> {
        lock(&self.queues)
    }

    #[inline]
    pub fn direct(&self) -> MutexGuard<'_, DirectLedger> {
        lock(&self.direct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Signal { caller: CallerId, sig: Signal },
    Event { caller: CallerId, job: JobRef, udata: u64 },
}

/// Notices collected under the lock, delivered after it is released.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    notices: Vec<Notice>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the delivery a `SigEvent` asks for. `job` is `JobRef::NONE`
    /// for a group notice.
    pub fn sigevent(&mut self, caller: CallerId, job: JobRef, ev: SigEvent) {
        match ev {
            SigEvent::None => {}
            SigEvent::Signal(sig) => self.notices.push(Notice::Signal { caller, sig }),
            SigEvent::Event { udata } => self.notices.push(Notice::Event { caller, job, udata }),
        }
    }

    pub fn signal(&mut self, caller: CallerId, sig: Signal) {
        self.notices.push(Notice::Signal { caller, sig });
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn deliver(self, notifier: &dyn Notifier) {
        for n in self.notices {
            match n {
                Notice::Signal { caller, sig } => notifier.signal(caller, sig),
                Notice::Event { caller, job, udata } => notifier.event(caller, job, udata),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aio_module::{Notification, QueueNotifier};

    #[test]
    fn job_refs_increase() {
        let mut q = Queues::new();
        let a = q.issue_job();
        let b = q.issue_job();
        assert_eq!(a, JobRef::FIRST);
        assert!(b > a);
        q.next_job = JobRef(i64::MAX);
        assert_eq!(q.issue_job(), JobRef(i64::MAX));
        assert_eq!(q.issue_job(), JobRef::FIRST);
    }

    #[test]
    fn outbox_delivers_in_order() {
        let n = QueueNotifier::new();
        let mut out = Outbox::new();
        out.sigevent(CallerId(1), JobRef(4), SigEvent::Event { udata: 9 });
        out.sigevent(CallerId(1), JobRef(4), SigEvent::None);
        out.signal(CallerId(2), Signal::SIGPIPE);
        out.deliver(&n);
        assert_eq!(
            n.drain(),
            vec![
                Notification::Event { caller: CallerId(1), job: JobRef(4), udata: 9 },
                Notification::Signal { caller: CallerId(2), sig: Signal::SIGPIPE },
            ]
        );
    }
}
