//! `MemFile`: in-memory regular file.
//!
//! Besides plain reads and writes it supports two test hooks: a gate
//! that holds every transfer until released (to keep workers busy), and
//! a fault queue that makes the next transfers stop early with an error.

use aio_core::entry::Opcode;
use aio_core::target::{IoTarget, Transfer};
use aio_core::Errno;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transfer at most `bytes`, then fail with `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub bytes: usize,
    pub errno: Errno,
}

/// Open/closed barrier shared by transfers.
#[derive(Default)]
pub(crate) struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub(crate) fn close(&self) {
        *lock(&self.closed) = true;
    }

    pub(crate) fn open(&self) {
        *lock(&self.closed) = false;
        self.cv.notify_all();
    }

    pub(crate) fn pass(&self) {
        let mut closed = lock(&self.closed);
        while *closed {
            closed = self.cv.wait(closed).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct MemFile {
    data: Mutex<Vec<u8>>,
    readable: bool,
    writable: bool,
    faults: Mutex<VecDeque<Fault>>,
    gate: Gate,
    started: AtomicUsize,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            readable: true,
            writable: true,
            faults: Mutex::new(VecDeque::new()),
            gate: Gate::default(),
            started: AtomicUsize::new(0),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Queue a fault for a later transfer.
    pub fn inject(&self, fault: Fault) {
        lock(&self.faults).push_back(fault);
    }

    /// Block every transfer at its start until `release`.
    pub fn hold(&self) {
        self.gate.close();
    }

    pub fn release(&self) {
        self.gate.open();
    }

    /// Transfers that have entered `sync_io`.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::Acquire)
    }

    /// Spin until `n` transfers have started. Returns false on timeout.
    pub fn wait_started(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.started() < n {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn transfer(&self, opcode: Opcode, buf: &mut [u8], offset: usize, limit: usize) -> usize {
        let mut data = lock(&self.data);
        let len = buf.len().min(limit);
        match opcode {
            Opcode::Read => {
                if offset >= data.len() {
                    return 0;
                }
                let avail = (data.len() - offset).min(len);
                buf[..avail].copy_from_slice(&data[offset..offset + avail]);
                avail
            }
            Opcode::Write => {
                if data.len() < offset + len {
                    data.resize(offset + len, 0);
                }
                data[offset..offset + len].copy_from_slice(&buf[..len]);
                len
            }
            Opcode::Nop => 0,
        }
    }
}

impl IoTarget for MemFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn sync_io(&self, opcode: Opcode, buf: &mut [u8], offset: i64) -> Transfer {
        self.started.fetch_add(1, Ordering::AcqRel);
        self.gate.pass();

        let Ok(offset) = usize::try_from(offset) else {
            return Transfer::failed(0, Errno::EINVAL);
        };
        let fault = lock(&self.faults).pop_front();
        let limit = fault.map_or(usize::MAX, |f| f.bytes);
        let n = self.transfer(opcode, buf, offset, limit);
        let t = match fault {
            Some(f) => Transfer::failed(n, f.errno),
            None => Transfer::done(n),
        };
        match opcode {
            Opcode::Write => t.charged(0, 1),
            _ => t.charged(1, 0),
        }
    }
}
