//! Block-device strategy abstraction (direct path).
//!
//! A `BlockDevice` accepts a transfer and returns immediately. The device
//! owns the pinned buffer until it calls the completion callback, which
//! may happen on any thread (a reaper, an interrupt-like context, or the
//! submitting thread itself).

use crate::buffer::PinnedBuf;
use crate::entry::Opcode;
use nix::errno::Errno;
use std::fmt;

/// One block transfer handed to a device.
#[derive(Debug)]
pub struct BlockIo {
    pub opcode: Opcode,
    pub offset: i64,
    pub len: usize,
    pub buf: PinnedBuf,
}

/// Completion status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockStatus {
    /// Bytes not transferred.
    pub resid: usize,
    pub error: Option<Errno>,
}

/// Completion callback. Invoked exactly once per accepted `BlockIo`.
pub type BlockDone = Box<dyn FnOnce(BlockIo, BlockStatus) + Send>;

/// Immediate rejection. The callback will never run; the transfer is
/// handed back so the pinned buffer can be released.
pub struct StrategyError {
    pub errno: Errno,
    pub io: BlockIo,
}

impl fmt::Debug for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyError")
            .field("errno", &self.errno)
            .field("io", &self.io)
            .finish()
    }
}

/// A device that can run transfers without a worker.
///
/// **Contract:**
/// - `strategy()` must NEVER block on the transfer itself.
/// - On `Ok(())`, `done` is called exactly once, from any thread.
/// - On `Err`, `done` is dropped without being called.
pub trait BlockDevice: Send + Sync {
    /// Physical block size. Direct transfers are multiples of it.
    fn block_size(&self) -> usize;

    fn strategy(&self, io: BlockIo, done: BlockDone) -> Result<(), StrategyError>;
}
