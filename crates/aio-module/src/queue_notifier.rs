//! `QueueNotifier`: default `Notifier` implementation.
//!
//! Records every notice in a lock-free MPMC queue. The embedding program
//! (or a test) drains it. Never blocks.

use aio_core::entry::{CallerId, JobRef};
use aio_core::notifier::Notifier;
use aio_core::Signal;

use crossbeam_queue::SegQueue;

/// One delivered notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Signal { caller: CallerId, sig: Signal },
    Event { caller: CallerId, job: JobRef, udata: u64 },
}

#[derive(Default)]
pub struct QueueNotifier {
    queue: SegQueue<Notification>,
}

impl QueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pop(&self) -> Option<Notification> {
        self.queue.pop()
    }

    /// Take everything delivered so far, in delivery order.
    pub fn drain(&self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(n) = self.queue.pop() {
            out.push(n);
        }
        out
    }
}

impl Notifier for QueueNotifier {
    fn signal(&self, caller: CallerId, sig: Signal) {
        self.queue.push(Notification::Signal { caller, sig });
    }

    fn event(&self, caller: CallerId, job: JobRef, udata: u64) {
        self.queue.push(Notification::Event { caller, job, udata });
    }
}
