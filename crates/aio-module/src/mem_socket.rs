//! `MemSocket`: in-memory socket-like target.
//!
//! Readable when its receive buffer holds data, writable unless blocked
//! with `set_writable(false)`. Interest registered while not ready is
//! fired once the condition changes. Wakers run after the internal lock
//! is dropped, because they call back into the manager.

use aio_core::entry::{Direction, Opcode};
use aio_core::readiness::{Pollable, ReadyWaker};
use aio_core::target::{IoTarget, Transfer};
use aio_core::Errno;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    write_blocked: bool,
    peer_closed: bool,
    read_waiters: Vec<ReadyWaker>,
    write_waiters: Vec<ReadyWaker>,
}

impl State {
    fn ready(&self, dir: Direction) -> bool {
        match dir {
            Direction::Read => !self.rx.is_empty() || self.peer_closed,
            Direction::Write => !self.write_blocked || self.peer_closed,
        }
    }
}

#[derive(Default)]
pub struct MemSocket {
    state: Mutex<State>,
}

impl MemSocket {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `bytes` available to readers.
    pub fn feed(&self, bytes: &[u8]) {
        let wakers = {
            let mut st = self.lock();
            st.rx.extend(bytes);
            std::mem::take(&mut st.read_waiters)
        };
        wakers.into_iter().for_each(ReadyWaker::wake);
    }

    pub fn set_writable(&self, writable: bool) {
        let wakers = {
            let mut st = self.lock();
            st.write_blocked = !writable;
            if writable {
                std::mem::take(&mut st.write_waiters)
            } else {
                Vec::new()
            }
        };
        wakers.into_iter().for_each(ReadyWaker::wake);
    }

    /// Peer went away: reads see EOF, writes see `EPIPE`.
    pub fn close_peer(&self) {
        let wakers = {
            let mut st = self.lock();
            st.peer_closed = true;
            let mut w = std::mem::take(&mut st.read_waiters);
            w.append(&mut st.write_waiters);
            w
        };
        wakers.into_iter().for_each(ReadyWaker::wake);
    }

    /// Everything written so far, leaving the buffer empty.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().tx)
    }

    /// Registered, not yet fired, interests.
    pub fn waiters(&self) -> usize {
        let st = self.lock();
        st.read_waiters.len() + st.write_waiters.len()
    }
}

impl IoTarget for MemSocket {
    fn sync_io(&self, opcode: Opcode, buf: &mut [u8], _offset: i64) -> Transfer {
        let mut st = self.lock();
        match opcode {
            Opcode::Read => {
                if st.rx.is_empty() {
                    return if st.peer_closed {
                        Transfer::done(0)
                    } else {
                        Transfer::failed(0, Errno::EWOULDBLOCK)
                    };
                }
                let n = st.rx.len().min(buf.len());
                for (dst, src) in buf.iter_mut().zip(st.rx.drain(..n)) {
                    *dst = src;
                }
                Transfer::done(n)
            }
            Opcode::Write => {
                if st.peer_closed {
                    return Transfer::failed(0, Errno::EPIPE);
                }
                if st.write_blocked {
                    return Transfer::failed(0, Errno::EWOULDBLOCK);
                }
                st.tx.extend_from_slice(buf);
                Transfer::done(buf.len())
            }
            Opcode::Nop => Transfer::failed(0, Errno::EINVAL),
        }
    }

    fn as_pollable(&self) -> Option<&dyn Pollable> {
        Some(self)
    }
}

impl Pollable for MemSocket {
    fn is_ready(&self, dir: Direction) -> bool {
        self.lock().ready(dir)
    }

    fn register_interest(&self, dir: Direction, waker: ReadyWaker) -> Option<ReadyWaker> {
        let mut st = self.lock();
        if st.ready(dir) {
            return Some(waker);
        }
        match dir {
            Direction::Read => st.read_waiters.push(waker),
            Direction::Write => st.write_waiters.push(waker),
        }
        None
    }

    fn prune(&self) {
        let mut st = self.lock();
        st.read_waiters.retain(ReadyWaker::is_live);
        st.write_waiters.retain(ReadyWaker::is_live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn interest_fires_once_on_feed() {
        let s = MemSocket::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        assert!(s
            .register_interest(Direction::Read, ReadyWaker::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .is_none());
        assert_eq!(s.waiters(), 1);
        s.feed(b"ab");
        s.feed(b"cd");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(s.waiters(), 0);
    }

    #[test]
    fn prune_drops_retired_interest() {
        let s = MemSocket::new();
        let stale = ReadyWaker::new(|| panic!("retired waker fired"));
        let handle = stale.handle();
        assert!(s.register_interest(Direction::Read, stale).is_none());
        assert!(s.register_interest(Direction::Read, ReadyWaker::new(|| {})).is_none());
        handle.retire();
        s.prune();
        assert_eq!(s.waiters(), 1);
        s.feed(b"x");
        assert_eq!(s.waiters(), 0);
    }

    #[test]
    fn ready_target_returns_waker() {
        let s = MemSocket::new();
        assert!(s.is_ready(Direction::Write));
        assert!(s
            .register_interest(Direction::Write, ReadyWaker::new(|| {}))
            .is_some());
    }

    #[test]
    fn read_drains_and_would_block() {
        let s = MemSocket::new();
        s.feed(b"hello");
        let mut buf = [0u8; 3];
        assert_eq!(s.sync_io(Opcode::Read, &mut buf, 0).bytes, 3);
        assert_eq!(&buf, b"hel");
        let mut rest = [0u8; 8];
        assert_eq!(s.sync_io(Opcode::Read, &mut rest, 0).bytes, 2);
        let t = s.sync_io(Opcode::Read, &mut rest, 0);
        assert_eq!(t.error, Some(Errno::EWOULDBLOCK));
    }

    #[test]
    fn closed_peer_breaks_pipe() {
        let s = MemSocket::new();
        s.close_peer();
        let mut buf = *b"x";
        assert_eq!(s.sync_io(Opcode::Write, &mut buf, 0).error, Some(Errno::EPIPE));
    }
}
