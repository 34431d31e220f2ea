//! In-memory staging buffer for encoded records.
//!
//! Frames accumulate here until the engine drains them into the active
//! segment's writer. The buffer carries its own mutex because readers
//! holding the engine's shared lock snapshot its contents for
//! buffer-resident reads.

use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{self, Write};

#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    bytes: Mutex<Vec<u8>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an encoded frame.
    pub fn write(&self, frame: &[u8]) {
        self.bytes.lock().extend_from_slice(frame);
    }

    /// Current number of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Write the entire contents to `writer` and clear the buffer. Both
    /// happen under the lock, so a concurrent snapshot sees either all of
    /// the bytes or none of them.
    pub fn flush_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut bytes = self.bytes.lock();
        writer.write_all(&bytes)?;
        let drained = bytes.len();
        bytes.clear();
        Ok(drained)
    }

    /// Immutable view of the current contents.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes.lock())
    }

    /// Discard buffered bytes without writing them anywhere.
    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}
