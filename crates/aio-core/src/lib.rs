//! # aio-core: Vocabulary and collaborator traits for the AIO manager
//!
//! This crate defines everything the request manager talks about but does
//! not implement itself: the caller's control block, shared I/O buffers,
//! the error taxonomy, and one trait per external collaborator.
//!
//! ## Collaborators
//!
//! | Trait           | Capability                                        |
//! |-----------------|---------------------------------------------------|
//! | `IoTarget`      | blocking read/write primitive (worker path)       |
//! | `BlockDevice`   | non-blocking device transfer + completion callback |
//! | `Pollable`      | readiness check and one-shot readiness interest   |
//! | `TargetTable`   | resolves a caller's target handles                |
//! | `Notifier`      | signal-like and event-queue-like delivery         |
//! | `WorkerSpawner` | execution-unit creation and parking               |
//! | `ExecContext`   | worker switch into a caller's identity            |
//!
//! Default implementations live in `aio-module`. The manager itself lives
//! in `aio-executor` and depends only on these traits.

pub mod entry;
pub mod buffer;
pub mod error;
pub mod target;
pub mod device;
pub mod readiness;
pub mod notifier;
pub mod worker;
pub mod env;

pub use buffer::{IoBuf, PinnedBuf};
pub use entry::{AioCb, AioOp, CallerId, Direction, IoResult, JobRef, Opcode, SigEvent, TargetId};
pub use error::{AioError, Result};

/// Re-exported so collaborators and callers share one errno type.
pub use nix::errno::Errno;
/// Re-exported so `SigEvent::Signal` can be built without a direct nix dependency.
pub use nix::sys::signal::Signal;
