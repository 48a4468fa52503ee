//! Shared I/O buffers.
//!
//! An `IoBuf` is the caller's buffer for one request. Every transfer *pins*
//! it: the storage is moved out into a `PinnedBuf` that the worker or the
//! device owns until the transfer ends, and every other access in the
//! meantime fails with `EFAULT`. The internal lock is only ever held for a
//! pointer swap or a copy, never across I/O.

use nix::errno::Errno;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Storage = Arc<Mutex<Option<Vec<u8>>>>;

/// Shared, caller-owned byte buffer. Clones alias the same storage.
#[derive(Clone)]
pub struct IoBuf {
    storage: Storage,
    size: usize,
}

fn lock(storage: &Storage) -> MutexGuard<'_, Option<Vec<u8>>> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IoBuf {
    /// Zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            size: data.len(),
            storage: Arc::new(Mutex::new(Some(data))),
        }
    }

    /// Length of the buffer. Fixed at creation, readable while pinned.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pinned(&self) -> bool {
        lock(&self.storage).is_none()
    }

    /// Run `f` with mutable access to the bytes.
    ///
    /// `f` runs under the buffer lock; use `pin` for anything that blocks.
    pub fn with<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, Errno> {
        let mut guard = lock(&self.storage);
        match guard.as_mut() {
            Some(data) => Ok(f(data.as_mut_slice())),
            None => Err(Errno::EFAULT),
        }
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Result<Vec<u8>, Errno> {
        self.with(|b| b.to_vec())
    }

    /// Move the storage out for a transfer.
    pub fn pin(&self) -> Result<PinnedBuf, Errno> {
        let data = lock(&self.storage).take().ok_or(Errno::EFAULT)?;
        Ok(PinnedBuf {
            owner: Arc::clone(&self.storage),
            data: Some(data),
        })
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lock(&self.storage).as_ref() {
            Some(_) => write!(f, "IoBuf({} bytes)", self.size),
            None => write!(f, "IoBuf(pinned)"),
        }
    }
}

/// Storage of an `IoBuf` while a device owns it.
///
/// Dropping a `PinnedBuf` without calling `unpin` still hands the storage
/// back, so a lost completion can never leak the caller's buffer.
pub struct PinnedBuf {
    owner: Storage,
    data: Option<Vec<u8>>,
}

impl PinnedBuf {
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Raw pointer for device DMA. Stable until `unpin`.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_mut_slice().as_mut_ptr()
    }

    /// Return the storage to its `IoBuf`.
    pub fn unpin(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some(data) = self.data.take() {
            *lock(&self.owner) = Some(data);
        }
    }
}

impl Drop for PinnedBuf {
    fn drop(&mut self) {
        self.restore();
    }
}

impl fmt::Debug for PinnedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinnedBuf({} bytes)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_blocks_other_access() {
        let buf = IoBuf::from_vec(vec![1, 2, 3, 4]);
        let mut pinned = buf.pin().unwrap();
        assert!(buf.is_pinned());
        assert_eq!(buf.to_vec(), Err(Errno::EFAULT));
        assert_eq!(buf.pin().err(), Some(Errno::EFAULT));

        pinned.as_mut_slice()[0] = 9;
        pinned.unpin();
        assert_eq!(buf.to_vec().unwrap(), vec![9, 2, 3, 4]);
    }

    #[test]
    fn drop_restores_storage() {
        let buf = IoBuf::new(8);
        {
            let _p = buf.pin().unwrap();
            assert!(buf.is_pinned());
            assert_eq!(buf.len(), 8);
        }
        assert!(!buf.is_pinned());
        assert_eq!(buf.to_vec().unwrap(), vec![0; 8]);
    }

    #[test]
    fn len_does_not_wait_for_a_pinned_transfer() {
        let buf = IoBuf::new(16);
        let held = buf.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let t = std::thread::spawn(move || {
            let _p = held.pin().unwrap();
            tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(50));
        });
        rx.recv().unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.with(|_| ()), Err(Errno::EFAULT));
        t.join().unwrap();
        assert!(!buf.is_pinned());
    }

    #[test]
    fn clones_alias() {
        let a = IoBuf::new(2);
        let b = a.clone();
        a.with(|d| d.copy_from_slice(b"hi")).unwrap();
        assert_eq!(b.to_vec().unwrap(), b"hi");
    }
}
