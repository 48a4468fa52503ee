//! Batch completion tracking.

use aio_core::SigEvent;

/// Aggregate of one batch.
///
/// Totals count members that are still outstanding (not reclaimed). The
/// "all done" notice is only considered once the batch is sealed, i.e.
/// every entry of the submission has been queued or rejected.
#[derive(Debug)]
pub(crate) struct Group {
    pub queued: usize,
    pub queued_done: usize,
    pub buffered: usize,
    pub buffered_done: usize,
    pub sigevent: SigEvent,
    pub sealed: bool,
    pub posted: bool,
}

impl Group {
    pub fn new(sigevent: SigEvent) -> Self {
        Self {
            queued: 0,
            queued_done: 0,
            buffered: 0,
            buffered_done: 0,
            sigevent,
            sealed: false,
            posted: false,
        }
    }

    #[inline]
    pub fn all_done(&self) -> bool {
        self.queued_done == self.queued && self.buffered_done == self.buffered
    }

    /// No outstanding members left.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queued == 0 && self.buffered == 0
    }

    /// Claim the right to post the "all done" notice. True at most once.
    pub fn take_notice(&mut self) -> Option<SigEvent> {
        if !self.sealed || self.posted || !self.all_done() || self.is_empty() {
            return None;
        }
        if self.sigevent == SigEvent::None {
            return None;
        }
        self.posted = true;
        Some(self.sigevent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aio_core::Signal;

    #[test]
    fn notice_only_after_seal_and_once() {
        let mut g = Group::new(SigEvent::Signal(Signal::SIGUSR2));
        g.queued = 2;
        g.buffered = 1;
        g.queued_done = 2;
        g.buffered_done = 1;
        assert_eq!(g.take_notice(), None);
        g.sealed = true;
        assert_eq!(g.take_notice(), Some(SigEvent::Signal(Signal::SIGUSR2)));
        assert_eq!(g.take_notice(), None);
    }

    #[test]
    fn partial_completion_posts_nothing() {
        let mut g = Group::new(SigEvent::Event { udata: 1 });
        g.sealed = true;
        g.queued = 2;
        g.queued_done = 1;
        assert!(!g.all_done());
        assert_eq!(g.take_notice(), None);
    }

    #[test]
    fn silent_group_never_posts() {
        let mut g = Group::new(SigEvent::None);
        g.sealed = true;
        g.queued = 1;
        g.queued_done = 1;
        assert_eq!(g.take_notice(), None);
        assert!(!g.posted);
    }
}
