//! Test helpers.

use crate::builder::{shared_for_tests, ManagerBuilder};
use crate::caller::CallerContext;
use crate::config::{AioConfig, CallerLimits};
use crate::state::Shared;
use crate::Manager;
use aio_core::worker::WorkerSpawner;
use aio_core::CallerId;
use aio_module::{FileTable, QueueNotifier};

use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CALLER: CallerId = CallerId(1);

pub fn manager(config: AioConfig) -> (Manager, Arc<QueueNotifier>) {
    let notifier = Arc::new(QueueNotifier::new());
    let mgr = ManagerBuilder::new()
        .config(config)
        .notifier(notifier.clone())
        .build()
        .expect("test config");
    (mgr, notifier)
}

pub fn manager_with_spawner(config: AioConfig, spawner: Arc<dyn WorkerSpawner>) -> (Manager, Arc<QueueNotifier>) {
    let notifier = Arc::new(QueueNotifier::new());
    let mgr = ManagerBuilder::new()
        .config(config)
        .notifier(notifier.clone())
        .spawner(spawner)
        .build()
        .expect("test config");
    (mgr, notifier)
}

/// Bare shared state with `CALLER` registered and no workers.
pub fn shared() -> Arc<Shared> {
    let shared = shared_for_tests(AioConfig::new());
    shared.queues().callers.insert(
        CALLER,
        CallerContext::new(CALLER, Arc::new(FileTable::new()), CallerLimits::default()),
    );
    shared
}

/// Poll `f` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
