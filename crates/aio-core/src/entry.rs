//! Control block and request vocabulary.
//!
//! An `AioCb` is the caller-side view of one request. The caller builds it
//! from an `AioOp`, hands a clone to the manager, and later uses the same
//! block to poll, suspend on, cancel, or reclaim the request. The manager
//! writes the job reference, status and error back into it; those fields
//! are the only data that crosses the boundary in that direction.

use crate::buffer::IoBuf;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

/// Job reference handed back on submission.
///
/// Strictly increasing across the whole manager. Valid references are
/// always positive; the sequence wraps from `i64::MAX` back to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct JobRef(pub i64);

impl JobRef {
    /// Value of a control block that was never accepted.
    pub const NONE: Self = Self(-1);
    /// Value written for a `Nop` entry.
    pub const NOP: Self = Self(0);
    pub const FIRST: Self = Self(1);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// The reference issued after this one.
    #[inline]
    pub fn next(self) -> Self {
        if self.0 < 1 || self.0 == i64::MAX {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Identifies one submitter (its queues, counters and quotas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CallerId(pub u32);

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller#{}", self.0)
    }
}

/// Caller-relative target handle, resolved through the caller's `TargetTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TargetId(pub i32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    /// Accepted and immediately done; only meaningful inside a batch.
    Nop,
}

impl Opcode {
    /// Readiness direction for a transfer. `None` for `Nop`.
    #[inline]
    pub fn direction(self) -> Option<Direction> {
        match self {
            Opcode::Read => Some(Direction::Read),
            Opcode::Write => Some(Direction::Write),
            Opcode::Nop => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Completion notification requested for a request or a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigEvent {
    #[default]
    None,
    Signal(Signal),
    /// Post an event-queue record carrying `udata`.
    Event { udata: u64 },
}

/// Result slot of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoResult {
    /// Bytes transferred, or -1 on failure.
    pub status: i64,
    pub error: Option<Errno>,
}

impl IoResult {
    pub const fn ok(bytes: usize) -> Self {
        Self { status: bytes as i64, error: None }
    }

    pub const fn failed(errno: Errno) -> Self {
        Self { status: -1, error: Some(errno) }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Caller-supplied description of one operation.
#[derive(Debug, Clone)]
pub struct AioOp {
    pub target: TargetId,
    pub opcode: Opcode,
    pub buf: IoBuf,
    pub offset: i64,
    /// Transfer length. Defaults to the buffer length at construction.
    pub nbytes: usize,
    pub sigevent: SigEvent,
}

impl AioOp {
    pub fn new(target: TargetId, opcode: Opcode, buf: IoBuf, offset: i64) -> Self {
        let nbytes = buf.len();
        Self {
            target,
            opcode,
            buf,
            offset,
            nbytes,
            sigevent: SigEvent::None,
        }
    }

    pub fn read(target: TargetId, buf: IoBuf, offset: i64) -> Self {
        Self::new(target, Opcode::Read, buf, offset)
    }

    pub fn write(target: TargetId, buf: IoBuf, offset: i64) -> Self {
        Self::new(target, Opcode::Write, buf, offset)
    }

    pub fn nop(target: TargetId) -> Self {
        Self::new(target, Opcode::Nop, IoBuf::new(0), 0)
    }

    pub fn nbytes(mut self, n: usize) -> Self {
        self.nbytes = n;
        self
    }

    pub fn sigevent(mut self, ev: SigEvent) -> Self {
        self.sigevent = ev;
        self
    }

    pub fn into_cb(self) -> AioCb {
        AioCb::new(self)
    }
}

struct ControlBlock {
    op: AioOp,
    job_ref: AtomicI64,
    status: AtomicI64,
    error: AtomicI32,
}

/// Shared control block. Clones refer to the same block.
#[derive(Clone)]
pub struct AioCb {
    inner: Arc<ControlBlock>,
}

impl AioCb {
    pub fn new(op: AioOp) -> Self {
        Self {
            inner: Arc::new(ControlBlock {
                op,
                job_ref: AtomicI64::new(JobRef::NONE.0),
                status: AtomicI64::new(-1),
                error: AtomicI32::new(0),
            }),
        }
    }

    #[inline]
    pub fn op(&self) -> &AioOp {
        &self.inner.op
    }

    #[inline]
    pub fn job_ref(&self) -> JobRef {
        JobRef(self.inner.job_ref.load(Ordering::Acquire))
    }

    /// Overwrite the job reference field.
    ///
    /// The field is caller-writable, exactly like the rest of the block;
    /// the manager validates it against its own records on every lookup.
    pub fn set_job_ref(&self, job: JobRef) {
        self.inner.job_ref.store(job.0, Ordering::Release);
    }

    /// Last status written back by the manager.
    pub fn status(&self) -> i64 {
        self.inner.status.load(Ordering::Acquire)
    }

    /// Last error written back by the manager (`EINPROGRESS` while queued).
    pub fn error(&self) -> Option<Errno> {
        match self.inner.error.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Errno::from_raw(raw)),
        }
    }

    /// Manager-side write-back of the result slot.
    pub fn publish(&self, status: i64, error: Option<Errno>) {
        self.inner.status.store(status, Ordering::Release);
        self.inner.error.store(error.map_or(0, |e| e as i32), Ordering::Release);
    }

    /// True when both handles name the same control block.
    #[inline]
    pub fn same_block(&self, other: &AioCb) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AioCb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AioCb")
            .field("target", &self.inner.op.target)
            .field("opcode", &self.inner.op.opcode)
            .field("offset", &self.inner.op.offset)
            .field("nbytes", &self.inner.op.nbytes)
            .field("job_ref", &self.job_ref())
            .field("status", &self.status())
            .field("error", &self.error())
            .finish()
    }
}
