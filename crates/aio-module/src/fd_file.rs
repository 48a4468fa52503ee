//! `FdFile`: an OS file as an `IoTarget`.
//!
//! Positioned `pread`/`pwrite` through nix. One block charge per
//! successful call, in the direction of the transfer.

use aio_core::entry::Opcode;
use aio_core::target::{IoTarget, Transfer};
use aio_core::Errno;

use nix::sys::uio::{pread, pwrite};
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct FdFile {
    file: File,
    readable: bool,
    writable: bool,
}

impl FdFile {
    pub fn new(file: File, readable: bool, writable: bool) -> Self {
        Self { file, readable, writable }
    }

    pub fn open_read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::new(File::open(path)?, true, false))
    }

    /// Open (creating if needed) for reading and writing.
    pub fn open_rw(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file, true, true))
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl IoTarget for FdFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn sync_io(&self, opcode: Opcode, buf: &mut [u8], offset: i64) -> Transfer {
        let res = match opcode {
            Opcode::Read => pread(&self.file, buf, offset as libc::off_t),
            Opcode::Write => pwrite(&self.file, buf, offset as libc::off_t),
            Opcode::Nop => return Transfer::failed(0, Errno::EINVAL),
        };
        match (res, opcode) {
            (Ok(n), Opcode::Read) => Transfer::done(n).charged(1, 0),
            (Ok(n), _) => Transfer::done(n).charged(0, 1),
            (Err(e), _) => Transfer::failed(0, e),
        }
    }
}
