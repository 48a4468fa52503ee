//! `MemDisk`: in-memory block device.
//!
//! Accepts direct transfers through `BlockDevice::strategy` and completes
//! them from a separate thread, the way a disk interrupt would. `hold`
//! parks accepted transfers until `release`, so a test can observe a
//! request while it is in flight on the device.

use aio_core::device::{BlockDevice, BlockDone, BlockIo, BlockStatus, StrategyError};
use aio_core::entry::Opcode;
use aio_core::target::{IoTarget, Transfer};
use aio_core::Errno;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type Store = Arc<Mutex<Vec<u8>>>;

pub struct MemDisk {
    data: Store,
    block_size: usize,
    held: AtomicBool,
    parked: Mutex<Vec<(BlockIo, BlockDone)>>,
    fail_next: Mutex<Option<Errno>>,
    accepted: AtomicUsize,
}

impl MemDisk {
    /// A zeroed disk of `blocks` blocks.
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0u8; block_size * blocks])),
            block_size,
            held: AtomicBool::new(false),
            parked: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            accepted: AtomicUsize::new(0),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Park accepted transfers instead of completing them.
    pub fn hold(&self) {
        self.held.store(true, Ordering::Release);
    }

    /// Stop parking and complete everything parked so far.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
        let parked = std::mem::take(&mut *lock(&self.parked));
        for (io, done) in parked {
            complete_async(Arc::clone(&self.data), io, done);
        }
    }

    /// Transfers parked by `hold`.
    pub fn in_flight(&self) -> usize {
        lock(&self.parked).len()
    }

    /// Transfers accepted by `strategy` so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Acquire)
    }

    /// Reject the next `strategy` call immediately with `errno`.
    pub fn fail_next(&self, errno: Errno) {
        *lock(&self.fail_next) = Some(errno);
    }
}

/// Copy between the disk and `buf`. Returns bytes moved.
fn copy(data: &Mutex<Vec<u8>>, opcode: Opcode, buf: &mut [u8], offset: usize) -> usize {
    let mut data = lock(data);
    if offset >= data.len() {
        return 0;
    }
    let avail = (data.len() - offset).min(buf.len());
    match opcode {
        Opcode::Read => buf[..avail].copy_from_slice(&data[offset..offset + avail]),
        Opcode::Write => data[offset..offset + avail].copy_from_slice(&buf[..avail]),
        Opcode::Nop => return 0,
    }
    avail
}

fn run(data: &Mutex<Vec<u8>>, mut io: BlockIo) -> (BlockIo, BlockStatus) {
    let status = match usize::try_from(io.offset) {
        Ok(offset) => {
            let len = io.len.min(io.buf.len());
            let n = copy(data, io.opcode, &mut io.buf.as_mut_slice()[..len], offset);
            BlockStatus { resid: io.len - n, error: None }
        }
        Err(_) => BlockStatus { resid: io.len, error: Some(Errno::EINVAL) },
    };
    (io, status)
}

fn complete_async(data: Store, io: BlockIo, done: BlockDone) {
    thread::spawn(move || {
        let (io, status) = run(&data, io);
        done(io, status);
    });
}

impl BlockDevice for MemDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn strategy(&self, io: BlockIo, done: BlockDone) -> Result<(), StrategyError> {
        if let Some(errno) = lock(&self.fail_next).take() {
            return Err(StrategyError { errno, io });
        }
        self.accepted.fetch_add(1, Ordering::AcqRel);
        if self.held.load(Ordering::Acquire) {
            lock(&self.parked).push((io, done));
        } else {
            complete_async(Arc::clone(&self.data), io, done);
        }
        Ok(())
    }
}

impl IoTarget for MemDisk {
    fn sync_io(&self, opcode: Opcode, buf: &mut [u8], offset: i64) -> Transfer {
        let Ok(offset) = usize::try_from(offset) else {
            return Transfer::failed(0, Errno::EINVAL);
        };
        let n = copy(&self.data, opcode, buf, offset);
        match opcode {
            Opcode::Write => Transfer::done(n).charged(0, 1),
            _ => Transfer::done(n).charged(1, 0),
        }
    }

    fn as_block_device(&self) -> Option<&dyn BlockDevice> {
        Some(self)
    }
}
