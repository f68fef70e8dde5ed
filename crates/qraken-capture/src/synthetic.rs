//! Software camera fed from another thread.
//!
//! [`SyntheticCamera`] implements [`CaptureDevice`] without hardware; frames
//! come in through the paired [`SyntheticFeed`]. Used by the replay backend
//! and by tests, which can also inject setup failures, missing controls,
//! panics, overruns and a device that never goes idle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use qraken_core::{DeviceError, PixelFormat, Resolution};
use tracing::trace;

use crate::device::{CaptureDevice, ReceiveRequest};
use crate::handle::{Handle, HandleLedger};
use crate::signal::Signal;

#[derive(Default)]
struct State {
    capturing: bool,
    active: bool,
    armed: Option<ReceiveRequest>,
    overflow: Option<Signal>,
    transfer_unit: u32,
    stay_busy: bool,
    fail_ops: HashSet<&'static str>,
    unsupported_ops: HashSet<&'static str>,
    panic_ops: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    delivered: u64,
}

struct Shared {
    state: Mutex<State>,
    armed_cv: Condvar,
    ledger: HandleLedger,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct SyntheticCamera {
    shared: Arc<Shared>,
}

/// Producer side of a [`SyntheticCamera`].
#[derive(Clone)]
pub struct SyntheticFeed {
    shared: Arc<Shared>,
}

impl SyntheticCamera {
    pub fn new() -> (Self, SyntheticFeed) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            armed_cv: Condvar::new(),
            ledger: HandleLedger::new(),
        });
        (Self { shared: Arc::clone(&shared) }, SyntheticFeed { shared })
    }

    fn call(&self, op: &'static str) -> Result<(), DeviceError> {
        let panics = {
            let mut state = self.shared.lock();
            *state.calls.entry(op).or_default() += 1;
            if state.fail_ops.contains(op) {
                return Err(DeviceError::new(op, "injected failure"));
            }
            if state.unsupported_ops.contains(op) {
                return Err(DeviceError::unsupported(op, "no such control"));
            }
            state.panic_ops.contains(op)
        };
        if panics {
            panic!("synthetic camera: injected panic in {op}");
        }
        Ok(())
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.call("init")
    }

    fn set_size(&mut self, _resolution: Resolution) -> Result<(), DeviceError> {
        self.call("set_size")
    }

    fn set_output_format(&mut self, _format: PixelFormat) -> Result<(), DeviceError> {
        self.call("set_output_format")
    }

    fn set_frame_rate(&mut self, _fps: u32) -> Result<(), DeviceError> {
        self.call("set_frame_rate")
    }

    fn set_noise_filter(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        self.call("set_noise_filter")
    }

    fn set_auto_exposure(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        self.call("set_auto_exposure")
    }

    fn set_auto_white_balance(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        self.call("set_auto_white_balance")
    }

    fn activate(&mut self) -> Result<(), DeviceError> {
        self.call("activate")?;
        self.shared.lock().active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), DeviceError> {
        self.call("deactivate")?;
        self.shared.lock().active = false;
        Ok(())
    }

    fn register_buffer_error(&mut self, signal: Signal) -> Result<Handle, DeviceError> {
        self.call("register_buffer_error")?;
        self.shared.lock().overflow = Some(signal);
        Ok(self.shared.ledger.open("buffer-error"))
    }

    fn max_transfer_unit(&self, resolution: Resolution) -> Result<u32, DeviceError> {
        self.call("max_transfer_unit")?;
        // Whole rows, at most 16 of them, like the handheld camera service.
        let row = resolution.width * 2;
        Ok(row * resolution.height.min(16))
    }

    fn set_transfer_unit(&mut self, unit: u32, _resolution: Resolution) -> Result<(), DeviceError> {
        self.call("set_transfer_unit")?;
        self.shared.lock().transfer_unit = unit;
        Ok(())
    }

    fn clear_buffer(&mut self) -> Result<(), DeviceError> {
        self.call("clear_buffer")
    }

    fn set_receiving(&mut self, request: ReceiveRequest) -> Result<Handle, DeviceError> {
        self.call("set_receiving")?;
        self.shared.lock().armed = Some(request);
        self.shared.armed_cv.notify_all();
        Ok(self.shared.ledger.open("receive"))
    }

    fn start_capture(&mut self) -> Result<(), DeviceError> {
        self.call("start_capture")?;
        self.shared.lock().capturing = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), DeviceError> {
        self.call("stop_capture")?;
        let mut state = self.shared.lock();
        state.capturing = false;
        state.armed = None;
        Ok(())
    }

    fn is_busy(&self) -> Result<bool, DeviceError> {
        let state = self.shared.lock();
        Ok(state.capturing || state.stay_busy)
    }

    fn shutdown(&mut self) {
        let mut state = self.shared.lock();
        *state.calls.entry("shutdown").or_default() += 1;
        state.overflow = None;
        state.armed = None;
    }
}

impl SyntheticFeed {
    /// Deliver one frame into the armed receive and raise frame-ready.
    ///
    /// Returns `false` (frame dropped) when capture is stopped or no receive
    /// is armed.
    pub fn push_frame(&self, frame: &[u8]) -> bool {
        let mut state = self.shared.lock();
        if !state.capturing {
            return false;
        }
        let Some(request) = state.armed.take() else {
            trace!("synthetic: frame dropped, no receive armed");
            return false;
        };
        state.delivered += 1;
        drop(state);

        request.buffer.fill(&frame[..frame.len().min(request.len)]);
        request.ready.raise();
        true
    }

    /// Block until a receive is armed or `timeout` passes.
    pub fn wait_armed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if state.capturing && state.armed.is_some() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .armed_cv
                .wait_timeout(state, (deadline - now).min(Duration::from_millis(10)))
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    /// Simulate a receive overrun.
    pub fn raise_buffer_error(&self) {
        let overflow = {
            let mut state = self.shared.lock();
            state.armed = None;
            state.overflow.clone()
        };
        if let Some(signal) = overflow {
            signal.raise();
        }
    }

    /// Make `op` fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.shared.lock().fail_ops.insert(op);
    }

    /// Make `op` report a missing control from now on.
    pub fn unsupported_on(&self, op: &'static str) {
        self.shared.lock().unsupported_ops.insert(op);
    }

    /// Make `op` panic from now on.
    pub fn panic_on(&self, op: &'static str) {
        self.shared.lock().panic_ops.insert(op);
    }

    /// Keep reporting busy after capture stops.
    pub fn stay_busy(&self, busy: bool) {
        self.shared.lock().stay_busy = busy;
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: &str) -> usize {
        self.shared.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.lock().capturing
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn transfer_unit(&self) -> u32 {
        self.shared.lock().transfer_unit
    }

    /// Frames handed to the worker so far.
    pub fn delivered(&self) -> u64 {
        self.shared.lock().delivered
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.shared.ledger
    }
}
