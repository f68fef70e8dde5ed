//! Latest-frame buffer shared between the capture thread (writer) and the
//! decode loop (reader).
//!
//! Both sides hold the lock for the whole copy, so a reader never sees half of
//! one frame and half of another. A reader may see the same frame twice or miss
//! one; only tearing is ruled out.

use std::sync::{Mutex, MutexGuard};

use qraken_core::{PixelFormat, Resolution};

pub struct FrameSink {
    resolution: Resolution,
    format: PixelFormat,
    frame: Mutex<Box<[u8]>>,
}

impl FrameSink {
    /// Allocate a zeroed frame of `resolution` in `format`.
    pub fn new(resolution: Resolution, format: PixelFormat) -> Self {
        let len = resolution.frame_len(format);
        Self {
            resolution,
            format,
            frame: Mutex::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Frame size in bytes.
    pub fn len(&self) -> usize {
        self.resolution.frame_len(self.format)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the frame with `src`. Copies `min(src.len(), self.len())` bytes.
    pub fn write(&self, src: &[u8]) -> usize {
        let mut frame = self.lock();
        let n = src.len().min(frame.len());
        frame[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Copy the current frame into `dst`. Copies `min(dst.len(), self.len())` bytes.
    pub fn snapshot(&self, dst: &mut [u8]) -> usize {
        let frame = self.lock();
        let n = dst.len().min(frame.len());
        dst[..n].copy_from_slice(&frame[..n]);
        n
    }

    /// Run `f` over the current frame while holding the lock.
    ///
    /// Used to format-convert straight out of the shared buffer without an
    /// intermediate copy. Keep `f` to pure memory work.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let frame = self.lock();
        f(&frame)
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        // Frame bytes carry no invariant a panicking holder could break.
        self.frame.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
