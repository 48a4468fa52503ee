//! # aio-module: Default implementations
//!
//! This crate provides a default implementation for every `aio-core`
//! collaborator trait, plus in-memory targets used by tests and the smoke
//! binary.
//!
//! ## Default stack
//!
//! | Trait           | Default Impl      | Platform alternative        |
//! |-----------------|-------------------|-----------------------------|
//! | WorkerSpawner   | ThreadSpawner     |                             |
//! | WorkerParking   | CondvarParking    |                             |
//! | Notifier        | QueueNotifier     | EventFdNotifier (linux)     |
//! | TargetTable     | FileTable         |                             |
//! | IoTarget        | FdFile            |                             |
//! | BlockDevice     | MemDisk (tests)   | UringDisk (linux)           |
//! | Pollable        | MemSocket (tests) |                             |
//! | ExecContext     | SharedContext     | (in aio-core)               |

pub mod parking;
pub mod thread_spawner;
pub mod queue_notifier;
pub mod file_table;
pub mod fd_file;
pub mod mem_file;
pub mod mem_disk;
pub mod mem_socket;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod eventfd_notifier;
        pub mod uring_disk;
        pub use eventfd_notifier::EventFdNotifier;
        pub use uring_disk::UringDisk;
    }
}

pub use fd_file::FdFile;
pub use file_table::FileTable;
pub use mem_disk::MemDisk;
pub use mem_file::MemFile;
pub use mem_socket::MemSocket;
pub use parking::CondvarParking;
pub use queue_notifier::{Notification, QueueNotifier};
pub use thread_spawner::ThreadSpawner;
