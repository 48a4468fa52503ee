//! AIO error types.

use nix::errno::Errno;
use thiserror::Error;

/// Caller-visible failure of a manager operation.
///
/// Per-request I/O errors are not reported through this type; they land in
/// the request's result slot and are read back with `reclaim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AioError {
    /// Quota exhausted or no worker could be started.
    #[error("resource temporarily unavailable")]
    Again,
    /// Target handle unknown or not open for the requested direction.
    #[error("bad target handle")]
    BadTarget,
    /// Malformed request (offset, opcode, list length, unknown job).
    #[error("invalid argument")]
    Invalid,
    /// Job reference belongs to a different control block.
    #[error("control block mismatch")]
    Fault,
    /// Blocking wait broken by an interrupt.
    #[error("interrupted")]
    Interrupted,
    /// Request accepted but not finished.
    #[error("operation in progress")]
    InProgress,
    #[error("operation canceled")]
    Canceled,
    /// A request reached a finished state twice.
    #[error("request already finished")]
    AlreadyFinished,
    /// No caller context is registered under the given id.
    #[error("unknown caller")]
    NoCaller,
    #[error("OS error: {0}")]
    Os(Errno),
}

impl AioError {
    /// The errno-like code surfaced to callers.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Again => Errno::EAGAIN,
            Self::BadTarget => Errno::EBADF,
            Self::Invalid | Self::NoCaller => Errno::EINVAL,
            Self::Fault => Errno::EFAULT,
            Self::Interrupted => Errno::EINTR,
            Self::InProgress => Errno::EINPROGRESS,
            Self::Canceled => Errno::ECANCELED,
            Self::AlreadyFinished => Errno::EALREADY,
            Self::Os(e) => *e,
        }
    }
}

impl From<Errno> for AioError {
    fn from(e: Errno) -> Self {
        match e {
            Errno::EAGAIN => Self::Again,
            Errno::EBADF => Self::BadTarget,
            Errno::EINVAL => Self::Invalid,
            Errno::EFAULT => Self::Fault,
            Errno::EINTR => Self::Interrupted,
            Errno::EINPROGRESS => Self::InProgress,
            Errno::ECANCELED => Self::Canceled,
            other => Self::Os(other),
        }
    }
}

impl From<std::io::Error> for AioError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(raw) => Errno::from_raw(raw).into(),
            None => Self::Os(Errno::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, AioError>;
