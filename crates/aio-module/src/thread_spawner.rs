//! `ThreadSpawner`: default `WorkerSpawner` implementation.
//!
//! One named OS thread per worker. An optional thread limit makes
//! creation fail with `EAGAIN` once that many spawned threads are alive,
//! mirroring a per-process thread rlimit.

use crate::parking::CondvarParking;
use aio_core::error::{AioError, Result};
use aio_core::worker::{WorkerBody, WorkerParking, WorkerSpawner};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub struct ThreadSpawner {
    stack_size: Option<usize>,
    max_threads: Option<usize>,
    live: Arc<AtomicUsize>,
}

/// Decrements the live count when the worker body returns or unwinds.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self {
            stack_size: None,
            max_threads: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = Some(n);
        self
    }

    /// Spawned threads that have not returned yet.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, name: String, body: WorkerBody) -> Result<()> {
        let prev = self.live.fetch_add(1, Ordering::AcqRel);
        if self.max_threads.is_some_and(|max| prev >= max) {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(AioError::Again);
        }

        let guard = LiveGuard(Arc::clone(&self.live));
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        // On spawn failure the closure (and the guard with it) is dropped.
        builder
            .spawn(move || {
                let _guard = guard;
                body();
            })
            .map(|_| ())
            .map_err(AioError::from)
    }

    fn new_parking(&self) -> Box<dyn WorkerParking> {
        Box::new(CondvarParking::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn spawns_named_thread() {
        let spawner = ThreadSpawner::new();
        let (tx, rx) = mpsc::channel();
        spawner
            .spawn(
                "aio-test-worker".into(),
                Box::new(move || {
                    let name = thread::current().name().map(str::to_owned);
                    tx.send(name).unwrap();
                }),
            )
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("aio-test-worker"));
    }

    #[test]
    fn limit_rejects_with_eagain() {
        let spawner = ThreadSpawner::new().max_threads(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        spawner
            .spawn(
                "aio-held".into(),
                Box::new(move || {
                    let _ = release_rx.recv();
                }),
            )
            .unwrap();

        let err = spawner.spawn("aio-extra".into(), Box::new(|| {})).unwrap_err();
        assert_eq!(err, AioError::Again);
        assert_eq!(spawner.live_threads(), 1);

        release_tx.send(()).unwrap();
        let start = std::time::Instant::now();
        while spawner.live_threads() != 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(spawner.live_threads(), 0);
    }
}
