//! Request records and the slot arena that owns them.

use aio_core::readiness::WakerHandle;
use aio_core::target::IoTarget;
use aio_core::{AioCb, IoResult, JobRef, Opcode};
use std::fmt;
use std::sync::Arc;

/// Index of a record in an `Arena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

/// Vec-backed arena with slot reuse.
pub(crate) struct Arena<T> {
    items: Vec<Option<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Slot {
        self.len += 1;
        match self.free.pop() {
            Some(i) => {
                self.items[i as usize] = Some(value);
                Slot(i)
            }
            None => {
                self.items.push(Some(value));
                Slot((self.items.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.items.get(slot.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.items.get_mut(slot.0 as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, slot: Slot) -> Option<T> {
        let value = self.items.get_mut(slot.0 as usize)?.take()?;
        self.free.push(slot.0);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (Slot(i as u32), v)))
    }
}

/// Lifecycle of a request.
///
/// ```text
/// QueuedReadiness ──ready──▶ QueuedWorker ──select──▶ Running ──▶ FinishedQueued
///        │                        │                                    ▲
///        └────────cancel──────────┴────────────────────────────────────┘
/// QueuedDirect ──device callback / immediate error──▶ FinishedDirect
/// ```
///
/// Reclaim removes the record from the arena; there is no reclaimed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    QueuedReadiness,
    QueuedDirect,
    QueuedWorker,
    Running,
    FinishedQueued,
    FinishedDirect,
}

impl JobState {
    #[inline]
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::FinishedQueued | JobState::FinishedDirect)
    }

    /// Direct-path states count against the buffer quota.
    #[inline]
    pub fn is_direct(self) -> bool {
        matches!(self, JobState::QueuedDirect | JobState::FinishedDirect)
    }

    /// Per-caller queue holding a request in this state.
    #[inline]
    pub fn queue(self) -> QueueKind {
        match self {
            JobState::QueuedReadiness => QueueKind::Readiness,
            JobState::QueuedDirect => QueueKind::PendingDirect,
            JobState::QueuedWorker | JobState::Running => QueueKind::Pending,
            JobState::FinishedQueued => QueueKind::Done,
            JobState::FinishedDirect => QueueKind::DoneDirect,
        }
    }
}

/// The five per-caller queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Worker-routed, queued or running.
    Pending = 0,
    Done = 1,
    PendingDirect = 2,
    DoneDirect = 3,
    /// Waiting for the target to become ready.
    Readiness = 4,
}

impl QueueKind {
    pub const ALL: [QueueKind; 5] = [
        QueueKind::Pending,
        QueueKind::Done,
        QueueKind::PendingDirect,
        QueueKind::DoneDirect,
        QueueKind::Readiness,
    ];
}

/// Block charges recorded by a worker transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Charge {
    pub in_blocks: u64,
    pub out_blocks: u64,
}

/// One accepted request.
pub(crate) struct Request {
    pub cb: AioCb,
    pub job: JobRef,
    /// Effective opcode; single submissions force it regardless of the block.
    pub opcode: Opcode,
    pub target: Arc<dyn IoTarget>,
    pub state: JobState,
    pub group: Option<Slot>,
    pub result: IoResult,
    pub charge: Charge,
    /// Registered readiness waker while parked.
    pub interest: Option<WakerHandle>,
}

impl Request {
    pub fn new(cb: AioCb, job: JobRef, opcode: Opcode, target: Arc<dyn IoTarget>, state: JobState) -> Self {
        Self {
            cb,
            job,
            opcode,
            target,
            state,
            group: None,
            result: IoResult { status: -1, error: None },
            charge: Charge::default(),
            interest: None,
        }
    }

    /// Retire the readiness waker, if any, and let the target drop it.
    pub fn withdraw_interest(&mut self) {
        if let Some(handle) = self.interest.take() {
            handle.retire();
            if let Some(pollable) = self.target.as_pollable() {
                pollable.prune();
            }
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("job", &self.job)
            .field("opcode", &self.opcode)
            .field("state", &self.state)
            .field("group", &self.group)
            .field("result", &self.result)
            .finish()
    }
}
