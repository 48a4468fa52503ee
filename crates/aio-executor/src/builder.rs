//! Manager construction.
//!
//! Every collaborator has a default from `aio-module`; swap any of them
//! and the manager does not change.

use crate::config::{AioConfig, ConfigError};
use crate::state::{DirectLedger, Queues, Shared};
use crate::Manager;
use aio_core::notifier::Notifier;
use aio_core::worker::{ExecContext, SharedContext, WorkerSpawner};
use aio_module::{QueueNotifier, ThreadSpawner};

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

pub struct ManagerBuilder {
    config: AioConfig,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    notifier: Option<Arc<dyn Notifier>>,
    exec: Option<Arc<dyn ExecContext>>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Builder with `AioConfig::from_env()` and the default collaborators.
    pub fn new() -> Self {
        Self {
            config: AioConfig::from_env(),
            spawner: None,
            notifier: None,
            exec: None,
        }
    }

    pub fn config(mut self, config: AioConfig) -> Self {
        self.config = config;
        self
    }

    /// How worker threads are created. Default: `ThreadSpawner`.
    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Where completion notices go. Default: a `QueueNotifier` nobody reads.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// How a worker takes on a caller's context. Default: `SharedContext`.
    pub fn exec_context(mut self, exec: Arc<dyn ExecContext>) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn build(self) -> Result<Manager, ConfigError> {
        self.config.validate()?;
        tracing::info!(
            max_workers = self.config.max_workers,
            target_workers = self.config.target_workers,
            max_queued = self.config.max_queued,
            max_buffers = self.config.max_buffers,
            listio_max = self.config.listio_max,
            "aio manager ready"
        );
        Ok(Manager { shared: self.into_shared() })
    }

    fn into_shared(self) -> Arc<Shared> {
        Arc::new(Shared {
            config: self.config,
            queues: Mutex::new(Queues::new()),
            direct: Mutex::new(DirectLedger::default()),
            spawner: self.spawner.unwrap_or_else(|| Arc::new(ThreadSpawner::new())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(QueueNotifier::new())),
            exec: self.exec.unwrap_or_else(|| Arc::new(SharedContext)),
            shutdown: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
pub(crate) fn shared_for_tests(config: AioConfig) -> Arc<Shared> {
    ManagerBuilder::new().config(config).into_shared()
}
