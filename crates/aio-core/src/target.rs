//! I/O target abstraction (worker path).
//!
//! An `IoTarget` is whatever a caller's target handle resolves to: a file,
//! a block device, or a socket-like object. Every target offers the
//! blocking `sync_io` primitive that workers run. Targets may additionally
//! expose the direct-path or readiness capabilities.
//!
//! # Implementors
//!
//! - `FdFile`: an OS file descriptor, `pread`/`pwrite`.
//! - `MemFile`, `MemDisk`, `MemSocket`: in-memory targets for tests.
//! - `UringDisk` (Linux): an io_uring-backed block device.

use crate::device::BlockDevice;
use crate::entry::{Opcode, TargetId};
use crate::readiness::Pollable;
use nix::errno::Errno;
use std::sync::Arc;

/// Outcome of one blocking transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    pub bytes: usize,
    pub error: Option<Errno>,
    /// Input block operations charged to the caller.
    pub in_blocks: u64,
    /// Output block operations charged to the caller.
    pub out_blocks: u64,
}

impl Transfer {
    pub fn done(bytes: usize) -> Self {
        Self { bytes, ..Self::default() }
    }

    pub fn failed(bytes: usize, errno: Errno) -> Self {
        Self {
            bytes,
            error: Some(errno),
            ..Self::default()
        }
    }

    pub fn charged(mut self, in_blocks: u64, out_blocks: u64) -> Self {
        self.in_blocks = in_blocks;
        self.out_blocks = out_blocks;
        self
    }
}

/// A resolvable I/O target.
///
/// **Contract:**
/// - `sync_io()` may block; it is only called from worker threads and
///   sync-mode submission.
/// - `opcode` is never `Opcode::Nop`.
/// - A partial transfer is reported as `bytes > 0` together with the error
///   that stopped it.
pub trait IoTarget: Send + Sync {
    /// Open for reading.
    fn readable(&self) -> bool {
        true
    }

    /// Open for writing.
    fn writable(&self) -> bool {
        true
    }

    /// Blocking read into / write from `buf` at `offset`.
    fn sync_io(&self, opcode: Opcode, buf: &mut [u8], offset: i64) -> Transfer;

    /// Direct-path capability, if the target is a block device.
    fn as_block_device(&self) -> Option<&dyn BlockDevice> {
        None
    }

    /// Readiness capability, if the target is socket-like.
    fn as_pollable(&self) -> Option<&dyn Pollable> {
        None
    }
}

/// A caller's descriptor table.
pub trait TargetTable: Send + Sync {
    fn resolve(&self, id: TargetId) -> Option<Arc<dyn IoTarget>>;
}
