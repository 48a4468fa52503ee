//! Condvar-based worker parking.
//!
//! One instance per worker. A wake that arrives while the worker is busy
//! stays pending and makes the next `park` return immediately.

use aio_core::worker::WorkerParking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct CondvarParking {
    /// wake pending
    mutex: Mutex<bool>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn signal(&self, all: bool) {
        {
            let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = true;
        }
        if all {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for CondvarParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            *guard = false;
            return true;
        }

        self.parked.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| Instant::now() + t);
        let woken = loop {
            guard = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    self.condvar
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            };
            if *guard {
                break true;
            }
        };
        *guard = false;
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.signal(false);
    }

    fn wake_all(&self) {
        self.signal(true);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
