//! Frame ring buffer
//!
//! Absorbs the mismatch between the host's callback block size and the
//! analysis hop size. Blocks of any length go in, fixed-length frames come
//! out in FIFO order. Storage is allocated once; writes never block and drop
//! whatever does not fit.

use thiserror::Error;

/// Errors returned by the frame ring buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingBufferError {
    /// The buffer was constructed without any storage.
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// A read asked for more samples than are buffered.
    #[error("requested {requested} samples, only {available} available")]
    Underrun {
        /// Number of samples requested.
        requested: usize,
        /// Number of samples buffered.
        available: usize,
    },
}

/// Fixed-capacity single-producer/single-consumer sample FIFO.
#[derive(Debug)]
pub struct FrameRingBuffer {
    storage: Box<[f32]>,
    read_index: usize,
    len: usize,
    overruns: u64,
}

impl FrameRingBuffer {
    /// Create a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        Ok(FrameRingBuffer {
            storage: vec![0.0; capacity].into_boxed_slice(),
            read_index: 0,
            len: 0,
            overruns: 0,
        })
    }

    /// Total number of samples the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of samples ready to be read.
    #[inline]
    pub fn read_available(&self) -> usize {
        self.len
    }

    /// Number of samples that can be written without dropping any.
    #[inline]
    pub fn write_available(&self) -> usize {
        self.capacity() - self.len
    }

    /// Total number of samples dropped because the buffer was full.
    #[inline]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Append `samples`, returning how many were stored.
    ///
    /// Samples that do not fit are dropped and counted as overruns.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let count = samples.len().min(self.write_available());
        let capacity = self.capacity();
        let write_index = (self.read_index + self.len) % capacity;

        let first = count.min(capacity - write_index);
        self.storage[write_index..write_index + first].copy_from_slice(&samples[..first]);
        self.storage[..count - first].copy_from_slice(&samples[first..count]);
        self.len += count;

        let dropped = samples.len() - count;
        if dropped > 0 {
            self.overruns += dropped as u64;
            log::trace!(
                "ring buffer overrun: dropped {dropped} samples ({} total)",
                self.overruns
            );
        }
        count
    }

    /// Fill `out` with the oldest `out.len()` samples and consume them.
    ///
    /// Nothing is consumed when fewer than `out.len()` samples are buffered.
    pub fn read(&mut self, out: &mut [f32]) -> Result<(), RingBufferError> {
        let count = out.len();
        if count > self.len {
            return Err(RingBufferError::Underrun {
                requested: count,
                available: self.len,
            });
        }
        let capacity = self.capacity();
        let first = count.min(capacity - self.read_index);
        out[..first].copy_from_slice(&self.storage[self.read_index..self.read_index + first]);
        out[first..].copy_from_slice(&self.storage[..count - first]);

        self.read_index = (self.read_index + count) % capacity;
        self.len -= count;
        Ok(())
    }

    /// Discard all buffered samples. The overrun counter is kept.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.len = 0;
    }
}
