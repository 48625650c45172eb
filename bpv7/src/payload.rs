/*!
The seam between the bundle codec and the payload store.

Payload bytes are never held in a block's contents buffer: the payload
processor streams them out by offset as they arrive and reads them
back on demand during transmission. The byte-stream file store itself
lives outside this crate; an in-memory implementation is provided for
nodes that do not persist payloads and for tests.
*/

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No payload with handle {0}")]
    NoSuchPayload(u64),

    #[error("Payload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A handle naming one stored payload byte stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHandle(pub u64);

/// Byte-stream storage for bundle payloads.
pub trait PayloadStore: Send + Sync {
    /// Allocates an empty payload and returns its handle.
    fn create(&self) -> Result<PayloadHandle, Error>;

    /// Writes `data` at `offset`, extending the payload as needed.
    fn write(&self, handle: PayloadHandle, offset: u64, data: &[u8]) -> Result<(), Error>;

    /// Reads up to `buf.len()` bytes from `offset`, returning the count.
    fn read(&self, handle: PayloadHandle, offset: u64, buf: &mut [u8]) -> Result<usize, Error>;

    /// Current length of the payload in bytes.
    fn len(&self, handle: PayloadHandle) -> Result<u64, Error>;

    /// Releases the payload.
    fn release(&self, handle: PayloadHandle) -> Result<(), Error>;
}

/// A heap-backed payload store.
#[derive(Default)]
pub struct MemoryPayloadStore {
    next: AtomicU64,
    payloads: Mutex<HashMap<u64, Vec<u8>>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn create(&self) -> Result<PayloadHandle, Error> {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.payloads.lock().insert(handle, Vec::new());
        Ok(PayloadHandle(handle))
    }

    fn write(&self, handle: PayloadHandle, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut payloads = self.payloads.lock();
        let payload = payloads
            .get_mut(&handle.0)
            .ok_or(Error::NoSuchPayload(handle.0))?;
        let end = offset as usize + data.len();
        if payload.len() < end {
            payload.resize(end, 0);
        }
        payload[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: PayloadHandle, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let payloads = self.payloads.lock();
        let payload = payloads
            .get(&handle.0)
            .ok_or(Error::NoSuchPayload(handle.0))?;
        let offset = offset as usize;
        if offset >= payload.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), payload.len() - offset);
        buf[..n].copy_from_slice(&payload[offset..offset + n]);
        Ok(n)
    }

    fn len(&self, handle: PayloadHandle) -> Result<u64, Error> {
        self.payloads
            .lock()
            .get(&handle.0)
            .map(|p| p.len() as u64)
            .ok_or(Error::NoSuchPayload(handle.0))
    }

    fn release(&self, handle: PayloadHandle) -> Result<(), Error> {
        self.payloads
            .lock()
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(Error::NoSuchPayload(handle.0))
    }
}

/// A bundle's reference to its out-of-band payload.
#[derive(Debug, Default, Clone)]
pub struct PayloadRef {
    /// Store handle, once allocated.
    pub handle: Option<PayloadHandle>,
    /// Expected length from the payload block header.
    pub length: u64,
    /// Bytes streamed to the store so far.
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let store = MemoryPayloadStore::new();
        let h = store.create().unwrap();
        store.write(h, 0, b"hello ").unwrap();
        store.write(h, 6, b"world").unwrap();
        assert_eq!(store.len(h).unwrap(), 11);

        let mut buf = [0u8; 16];
        let n = store.read(h, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");

        let n = store.read(h, 6, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");

        store.release(h).unwrap();
        assert!(matches!(store.len(h), Err(Error::NoSuchPayload(_))));
    }

    #[test]
    fn sparse_write_zero_fills() {
        let store = MemoryPayloadStore::new();
        let h = store.create().unwrap();
        store.write(h, 4, b"x").unwrap();
        let mut buf = [0xAAu8; 5];
        assert_eq!(store.read(h, 0, &mut buf).unwrap(), 5);
        assert_eq!(buf, [0, 0, 0, 0, b'x']);
    }
}
