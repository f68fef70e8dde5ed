//! The capture hardware seam.
//!
//! [`CaptureDevice`] is shaped after a camera service that delivers frames by
//! asynchronous receive: the caller arms one receive into a buffer, the
//! device fills it and raises the frame-ready signal, and the caller re-arms.
//! Overflows raise a separately registered buffer-error signal.

use std::sync::{Arc, Mutex, MutexGuard};

use qraken_core::{DeviceError, PixelFormat, Resolution};

use crate::handle::Handle;
use crate::signal::Signal;

/// Reusable buffer the device receives one frame into.
#[derive(Clone, Debug)]
pub struct RecvBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl RecvBuffer {
    pub fn new(len: usize) -> Self {
        Self { data: Arc::new(Mutex::new(vec![0u8; len])) }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device side: copy a received frame in.
    pub fn fill(&self, src: &[u8]) -> usize {
        let mut data = self.lock();
        let n = src.len().min(data.len());
        data[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Device side: copy a frame whose rows are `stride` bytes apart, keeping
    /// the first `row_len` bytes of each row.
    pub fn fill_rows(&self, src: &[u8], stride: usize, row_len: usize) -> usize {
        if stride == row_len {
            return self.fill(src);
        }
        let mut data = self.lock();
        let mut copied = 0;
        for (dst, row) in data.chunks_mut(row_len).zip(src.chunks(stride)) {
            let n = dst.len().min(row.len()).min(row_len);
            dst[..n].copy_from_slice(&row[..n]);
            copied += n;
        }
        copied
    }

    /// Zero the buffer.
    pub fn clear(&self) {
        self.lock().fill(0);
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// One armed asynchronous receive.
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub buffer: RecvBuffer,
    /// Bytes to receive before raising `ready`.
    pub len: usize,
    /// Hardware transfer size the receive is split into.
    pub transfer_unit: u32,
    pub ready: Signal,
}

/// Camera hardware driven by the capture worker.
///
/// Setter calls may fail individually; whether a failure aborts startup is
/// the worker's decision, not the device's.
pub trait CaptureDevice: Send {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Bring up the camera service.
    fn init(&mut self) -> Result<(), DeviceError>;

    fn set_size(&mut self, resolution: Resolution) -> Result<(), DeviceError>;
    fn set_output_format(&mut self, format: PixelFormat) -> Result<(), DeviceError>;
    fn set_frame_rate(&mut self, fps: u32) -> Result<(), DeviceError>;
    fn set_noise_filter(&mut self, enabled: bool) -> Result<(), DeviceError>;
    fn set_auto_exposure(&mut self, enabled: bool) -> Result<(), DeviceError>;
    fn set_auto_white_balance(&mut self, enabled: bool) -> Result<(), DeviceError>;

    fn activate(&mut self) -> Result<(), DeviceError>;
    fn deactivate(&mut self) -> Result<(), DeviceError>;

    /// Register `signal` to be raised on receive overflow.
    fn register_buffer_error(&mut self, signal: Signal) -> Result<Handle, DeviceError>;

    /// Largest transfer size the hardware supports at `resolution`.
    fn max_transfer_unit(&self, resolution: Resolution) -> Result<u32, DeviceError>;
    fn set_transfer_unit(&mut self, unit: u32, resolution: Resolution) -> Result<(), DeviceError>;

    /// Drop any partially received data.
    fn clear_buffer(&mut self) -> Result<(), DeviceError>;

    /// Arm one receive. The returned handle must be dropped once the receive
    /// completes or is abandoned.
    fn set_receiving(&mut self, request: ReceiveRequest) -> Result<Handle, DeviceError>;

    fn start_capture(&mut self) -> Result<(), DeviceError>;
    fn stop_capture(&mut self) -> Result<(), DeviceError>;
    fn is_busy(&self) -> Result<bool, DeviceError>;

    /// Release the camera service.
    fn shutdown(&mut self);
}
