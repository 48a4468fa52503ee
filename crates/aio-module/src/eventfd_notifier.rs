//! `EventFdNotifier`: Linux `Notifier` implementation.
//!
//! Queues each notice like `QueueNotifier` and bumps an eventfd so a poll
//! loop wakes up. Multiple notices before the consumer reads the eventfd
//! coalesce into one wakeup (eventfd counter semantics).

use crate::queue_notifier::{Notification, QueueNotifier};
use aio_core::entry::{CallerId, JobRef};
use aio_core::error::{AioError, Result};
use aio_core::notifier::Notifier;
use aio_core::{Errno, Signal};

use std::os::unix::io::RawFd;

pub struct EventFdNotifier {
    fd: RawFd,
    queue: QueueNotifier,
}

impl EventFdNotifier {
    /// Create a new eventfd and wrap it. The notifier closes it on drop.
    pub fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(AioError::Os(Errno::last()));
        }
        Ok(Self {
            fd,
            queue: QueueNotifier::new(),
        })
    }

    /// The eventfd, for registration with a poll loop.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read and reset the eventfd counter. Returns 0 if nothing is pending.
    pub fn read_counter(&self) -> Result<u64> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return match Errno::last() {
                Errno::EAGAIN => Ok(0),
                e => Err(AioError::Os(e)),
            };
        }
        Ok(val)
    }

    pub fn drain(&self) -> Vec<Notification> {
        self.queue.drain()
    }

    fn bump(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // EAGAIN: counter saturated, a wakeup is already pending.
            if errno != Errno::EAGAIN {
                tracing::warn!(fd = self.fd, ?errno, "eventfd write failed");
            }
        }
    }
}

impl Notifier for EventFdNotifier {
    fn signal(&self, caller: CallerId, sig: Signal) {
        self.queue.signal(caller, sig);
        self.bump();
    }

    fn event(&self, caller: CallerId, job: JobRef, udata: u64) {
        self.queue.event(caller, job, udata);
        self.bump();
    }
}

impl Drop for EventFdNotifier {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_coalesce_on_counter() {
        let n = EventFdNotifier::create().unwrap();
        assert_eq!(n.read_counter().unwrap(), 0);
        n.event(CallerId(1), JobRef(1), 5);
        n.signal(CallerId(1), Signal::SIGIO);
        assert_eq!(n.read_counter().unwrap(), 2);
        assert_eq!(n.read_counter().unwrap(), 0);
        assert_eq!(n.drain().len(), 2);
    }
}
