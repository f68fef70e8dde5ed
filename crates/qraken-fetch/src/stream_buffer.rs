//! Accumulation buffer for a response body of unknown length.
//!
//! Capacity starts at [`INITIAL_CAPACITY`] on the first chunk and doubles
//! until the chunk fits. It never shrinks during a download; [`reset`]
//! returns the buffer to empty with zero capacity.
//!
//! [`reset`]: StreamBuffer::reset

use tracing::{trace, warn};

/// Capacity allocated for the first chunk.
pub const INITIAL_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
pub struct StreamBuffer {
    data: Vec<u8>,
    /// Logical capacity, always a power-of-two multiple of `INITIAL_CAPACITY` or 0.
    capacity: usize,
    /// Growth past this many bytes is refused.
    limit: Option<usize>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that refuses to grow its capacity past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    /// Append `chunk`, growing as needed.
    ///
    /// Returns the number of bytes accepted: `chunk.len()` on success, 0 if
    /// the buffer could not grow. A short count must abort the transfer.
    pub fn accept(&mut self, chunk: &[u8]) -> usize {
        let written = self.data.len();
        let Some(needed) = written.checked_add(chunk.len()) else {
            return 0;
        };

        let mut capacity = if self.capacity == 0 { INITIAL_CAPACITY } else { self.capacity };
        while needed > capacity {
            match capacity.checked_mul(2) {
                Some(doubled) => capacity = doubled,
                None => return 0,
            }
        }

        if capacity != self.capacity {
            if self.limit.is_some_and(|limit| capacity > limit) {
                warn!("Receive buffer limit reached at {} bytes", written);
                return 0;
            }
            if let Err(e) = self.data.try_reserve_exact(capacity - written) {
                warn!("Receive buffer could not grow to {} bytes: {}", capacity, e);
                return 0;
            }
            trace!("Receive buffer grown {} → {}", self.capacity, capacity);
            self.capacity = capacity;
        }

        self.data.extend_from_slice(chunk);
        chunk.len()
    }

    pub fn written(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The accepted bytes, `[0, written)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Free the storage and return to `written = 0, capacity = 0`.
    pub fn reset(&mut self) {
        self.data = Vec::new();
        self.capacity = 0;
    }
}
