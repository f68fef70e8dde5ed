//! `CaptureWorker`: the capture thread.
//!
//! ```text
//! Starting ──► Capturing ──(cancel)──► Stopping ──► Stopped
//!                 │  ▲
//!   frame-ready / │  │ re-arm receive
//!   buffer-error  ▼  │
//!               (handle)
//! ```
//!
//! The worker owns the device and the hardware receive buffer. It copies
//! every completed receive into the shared [`FrameSink`] and re-arms. The
//! decode loop stops it through the [`CaptureHandle`] it gets back from
//! [`CaptureWorker::spawn`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use qraken_core::{CaptureError, DeviceError, SetupPolicy};
use tracing::{debug, info, trace, warn};

use crate::device::{CaptureDevice, ReceiveRequest, RecvBuffer};
use crate::frame_sink::FrameSink;
use crate::handle::Handle;
use crate::signal::{CancelToken, WaitSet, WaitSlot};
use crate::CaptureConfig;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Capturing,
    Stopping,
    Stopped,
}

/// What the worker did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames: u64,
    pub overruns: u64,
}

// ── CaptureWorker ─────────────────────────────────────────────────────────────

pub struct CaptureWorker {
    device: Box<dyn CaptureDevice>,
    config: CaptureConfig,
    sink: Arc<FrameSink>,
    waits: WaitSet,
    hw_buffer: RecvBuffer,
    transfer_unit: u32,
    receive: Option<Handle>,
    buffer_error: Option<Handle>,
    report: CaptureReport,
}

impl CaptureWorker {
    pub fn new(device: Box<dyn CaptureDevice>, config: CaptureConfig, sink: Arc<FrameSink>) -> Self {
        let hw_buffer = RecvBuffer::new(sink.len());
        Self {
            device,
            config,
            sink,
            waits: WaitSet::new(),
            hw_buffer,
            transfer_unit: 0,
            receive: None,
            buffer_error: None,
            report: CaptureReport::default(),
        }
    }

    /// Start the worker on its own thread.
    ///
    /// Fails only if the thread cannot be created. Device setup failures are
    /// reported when the handle is joined.
    pub fn spawn(
        device: Box<dyn CaptureDevice>,
        config: CaptureConfig,
        sink: Arc<FrameSink>,
    ) -> Result<CaptureHandle, CaptureError> {
        let worker = Self::new(device, config, sink);
        let cancel = worker.waits.cancel_token();
        let finished = Arc::new(AtomicBool::new(false));
        let done = FinishedGuard(Arc::clone(&finished));

        let thread = thread::Builder::new()
            .name("qraken-capture".into())
            .spawn(move || {
                // Published on return and on unwind alike.
                let _done = done;
                worker.run()
            })
            .map_err(CaptureError::Spawn)?;

        Ok(CaptureHandle { cancel, finished, thread: Some(thread) })
    }

    /// Cancellation handle for a worker that will be run on the current thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.waits.cancel_token()
    }

    /// Drive the state machine to `Stopped`.
    pub fn run(mut self) -> Result<CaptureReport, CaptureError> {
        let mut state = WorkerState::Starting;
        let mut failure: Option<CaptureError> = None;

        loop {
            let next = match state {
                WorkerState::Starting => match self.start() {
                    Ok(()) => {
                        info!(
                            "Capture started on {} ({} @{}fps, transfer unit {})",
                            self.device.name(),
                            self.config.resolution,
                            self.config.frame_rate,
                            self.transfer_unit
                        );
                        WorkerState::Capturing
                    }
                    Err(e) => {
                        warn!("Capture startup failed: {}", e);
                        failure = Some(e);
                        WorkerState::Stopping
                    }
                },
                WorkerState::Capturing => match self.waits.wait_any() {
                    WaitSlot::Cancel => {
                        debug!("Capture cancel requested");
                        WorkerState::Stopping
                    }
                    WaitSlot::FrameReady => match self.on_frame_ready() {
                        Ok(()) => WorkerState::Capturing,
                        Err(e) => {
                            failure = Some(e);
                            WorkerState::Stopping
                        }
                    },
                    WaitSlot::BufferError => match self.on_buffer_error() {
                        Ok(()) => WorkerState::Capturing,
                        Err(e) => {
                            failure = Some(e);
                            WorkerState::Stopping
                        }
                    },
                },
                WorkerState::Stopping => {
                    if let Err(e) = self.stop() {
                        failure.get_or_insert(e);
                    }
                    WorkerState::Stopped
                }
                WorkerState::Stopped => break,
            };
            if next != state {
                debug!("Capture state {:?} → {:?}", state, next);
            }
            state = next;
        }

        info!(
            "Capture stopped: {} frames, {} overruns",
            self.report.frames, self.report.overruns
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }

    // ── Starting ──────────────────────────────────────────────────────────────

    fn start(&mut self) -> Result<(), CaptureError> {
        let cfg = self.config.clone();
        let policy = cfg.setup_policy;

        self.device.init().map_err(CaptureError::Setup)?;
        check(policy, self.device.set_size(cfg.resolution))?;
        check(policy, self.device.set_output_format(cfg.pixel_format))?;
        check(policy, self.device.set_frame_rate(cfg.frame_rate))?;
        check(policy, self.device.set_noise_filter(cfg.noise_filter))?;
        check(policy, self.device.set_auto_exposure(cfg.auto_exposure))?;
        check(policy, self.device.set_auto_white_balance(cfg.auto_white_balance))?;
        check(policy, self.device.activate())?;

        let overflow = self.waits.signal(WaitSlot::BufferError);
        match self.device.register_buffer_error(overflow) {
            Ok(handle) => self.buffer_error = Some(handle),
            Err(e) => check(policy, Err(e))?,
        }

        let frame_len = self.hw_buffer.len();
        self.transfer_unit = match self.device.max_transfer_unit(cfg.resolution) {
            Ok(unit) => unit,
            Err(e) => {
                check(policy, Err(e))?;
                u32::try_from(frame_len).unwrap_or(u32::MAX)
            }
        };
        check(policy, self.device.set_transfer_unit(self.transfer_unit, cfg.resolution))?;
        check(policy, self.device.clear_buffer())?;

        // Without an armed receive no frame ever arrives, whatever the policy.
        self.arm_receive()?;
        self.device.start_capture().map_err(CaptureError::Setup)?;
        Ok(())
    }

    fn arm_receive(&mut self) -> Result<(), CaptureError> {
        let request = ReceiveRequest {
            buffer: self.hw_buffer.clone(),
            len: self.hw_buffer.len(),
            transfer_unit: self.transfer_unit,
            ready: self.waits.signal(WaitSlot::FrameReady),
        };
        let handle = self.device.set_receiving(request).map_err(CaptureError::Device)?;
        self.receive = Some(handle);
        Ok(())
    }

    // ── Capturing ─────────────────────────────────────────────────────────────

    fn on_frame_ready(&mut self) -> Result<(), CaptureError> {
        drop(self.receive.take());

        let sink = &self.sink;
        let copied = self.hw_buffer.read(|data| sink.write(data));
        self.report.frames += 1;
        trace!("Frame {} copied ({} bytes)", self.report.frames, copied);

        self.arm_receive()
    }

    fn on_buffer_error(&mut self) -> Result<(), CaptureError> {
        drop(self.receive.take());
        self.report.overruns += 1;
        debug!("Capture buffer overrun #{}; restarting receive", self.report.overruns);

        if let Err(e) = self.device.clear_buffer() {
            warn!("clear_buffer after overrun: {}", e);
        }
        self.hw_buffer.clear();
        self.arm_receive()?;
        // The hardware may have stopped on its own; starting again is harmless.
        if let Err(e) = self.device.start_capture() {
            warn!("start_capture after overrun: {}", e);
        }
        Ok(())
    }

    // ── Stopping ──────────────────────────────────────────────────────────────

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Err(e) = self.device.stop_capture() {
            warn!("stop_capture: {}", e);
        }

        let timeout = self.config.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        loop {
            match self.device.is_busy() {
                Ok(false) => break,
                Ok(true) if Instant::now() >= deadline => {
                    timed_out = true;
                    break;
                }
                Ok(true) => thread::sleep(self.config.shutdown_poll),
                Err(e) => {
                    warn!("is_busy: {}; assuming idle", e);
                    break;
                }
            }
        }

        if let Err(e) = self.device.clear_buffer() {
            warn!("clear_buffer on stop: {}", e);
        }
        if let Err(e) = self.device.deactivate() {
            warn!("deactivate: {}", e);
        }
        self.device.shutdown();

        drop(self.receive.take());
        drop(self.buffer_error.take());

        if timed_out {
            let ms = timeout.as_millis() as u64;
            warn!("{} still busy after {}ms; abandoning", self.device.name(), ms);
            return Err(CaptureError::ShutdownTimeout { ms });
        }
        Ok(())
    }
}

/// Apply `policy` to the outcome of one device configuration call.
///
/// A control the device does not have is skipped under either policy.
fn check(policy: SetupPolicy, result: Result<(), DeviceError>) -> Result<(), CaptureError> {
    match (result, policy) {
        (Ok(()), _) => Ok(()),
        (Err(e), _) if e.unsupported => {
            debug!("Skipping capture setting: {}", e);
            Ok(())
        }
        (Err(e), SetupPolicy::Strict) => Err(CaptureError::Setup(e)),
        (Err(e), SetupPolicy::BestEffort) => {
            warn!("Ignoring capture setup failure: {}", e);
            Ok(())
        }
    }
}

// ── CaptureHandle ─────────────────────────────────────────────────────────────

/// Sets the shared finished flag when the capture thread lets go of it.
struct FinishedGuard(Arc<AtomicBool>);

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Owner-side handle to a running capture thread.
///
/// Dropping the handle cancels the worker and waits for it.
pub struct CaptureHandle {
    cancel: CancelToken,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<CaptureReport, CaptureError>>>,
}

impl CaptureHandle {
    /// True once the worker has released all its resources.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Ask the worker to stop. Does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the worker to finish.
    pub fn stop(mut self) -> Result<CaptureReport, CaptureError> {
        self.cancel();
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<CaptureReport, CaptureError> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(Err(CaptureError::Panicked)),
            None => Ok(CaptureReport::default()),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
            if let Err(e) = self.join_thread() {
                warn!("Capture worker ended with error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticCamera;
    use qraken_core::{PixelFormat, Resolution};
    use std::time::Duration;

    fn config() -> CaptureConfig {
        CaptureConfig {
            resolution: Resolution::new(8, 4),
            shutdown_timeout: Duration::from_millis(200),
            ..CaptureConfig::default()
        }
    }

    fn sink(cfg: &CaptureConfig) -> Arc<FrameSink> {
        Arc::new(FrameSink::new(cfg.resolution, PixelFormat::Rgb565))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn frames_reach_the_sink_and_cancel_closes_every_handle() {
        let cfg = config();
        let sink = sink(&cfg);
        let (camera, feed) = SyntheticCamera::new();
        let handle = CaptureWorker::spawn(Box::new(camera), cfg, Arc::clone(&sink)).unwrap();

        for value in 1..=3u8 {
            assert!(feed.wait_armed(Duration::from_secs(5)));
            assert!(feed.push_frame(&vec![value; 64]));
            assert!(wait_until(|| sink.read(|f| f[0] == value)));
        }

        let report = handle.stop().unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(feed.delivered(), 3);
        assert_eq!(feed.ledger().outstanding(), 0);
        assert_eq!(feed.ledger().opened(), feed.ledger().closed());
        assert!(!feed.is_capturing());
    }

    #[test]
    fn buffer_error_rearms_and_restarts() {
        let cfg = config();
        let (camera, feed) = SyntheticCamera::new();
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(feed.wait_armed(Duration::from_secs(5)));
        feed.raise_buffer_error();
        assert!(wait_until(|| feed.calls("start_capture") == 2));
        assert!(feed.wait_armed(Duration::from_secs(5)));
        assert!(feed.push_frame(&[7; 64]));
        // Re-armed means the frame was handled.
        assert!(feed.wait_armed(Duration::from_secs(5)));

        let report = handle.stop().unwrap();
        assert_eq!(report.overruns, 1);
        assert_eq!(report.frames, 1);
        assert_eq!(feed.ledger().outstanding(), 0);
    }

    #[test]
    fn strict_policy_aborts_on_failed_setting() {
        let cfg = config();
        let (camera, feed) = SyntheticCamera::new();
        feed.fail_on("set_auto_white_balance");
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(wait_until(|| handle.is_finished()));
        match handle.stop() {
            Err(CaptureError::Setup(e)) => assert_eq!(e.op, "set_auto_white_balance"),
            other => panic!("expected setup error, got {:?}", other),
        }
        assert_eq!(feed.calls("start_capture"), 0);
        assert_eq!(feed.ledger().outstanding(), 0);
    }

    #[test]
    fn strict_policy_skips_controls_the_device_lacks() {
        let cfg = config();
        assert_eq!(cfg.setup_policy, SetupPolicy::Strict);
        let (camera, feed) = SyntheticCamera::new();
        feed.unsupported_on("set_noise_filter");
        feed.unsupported_on("set_auto_exposure");
        feed.unsupported_on("set_auto_white_balance");
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(feed.wait_armed(Duration::from_secs(5)));
        assert!(!handle.is_finished());
        assert!(feed.is_active());
        assert_eq!(feed.calls("start_capture"), 1);
        assert!(handle.stop().is_ok());
        assert!(!feed.is_active());
    }

    #[test]
    fn panicking_device_still_marks_the_worker_finished() {
        let cfg = config();
        let (camera, feed) = SyntheticCamera::new();
        feed.panic_on("start_capture");
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(wait_until(|| handle.is_finished()));
        assert!(matches!(handle.stop(), Err(CaptureError::Panicked)));
        assert_eq!(feed.ledger().outstanding(), 0);
    }

    #[test]
    fn best_effort_policy_keeps_going() {
        let cfg = CaptureConfig { setup_policy: SetupPolicy::BestEffort, ..config() };
        let (camera, feed) = SyntheticCamera::new();
        feed.fail_on("set_noise_filter");
        feed.fail_on("max_transfer_unit");
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(feed.wait_armed(Duration::from_secs(5)));
        assert!(!handle.is_finished());
        assert_eq!(feed.transfer_unit(), 64, "falls back to one whole frame");
        assert!(handle.stop().is_ok());
    }

    #[test]
    fn wedged_device_times_out_but_still_finishes() {
        let cfg = CaptureConfig { shutdown_timeout: Duration::from_millis(20), ..config() };
        let (camera, feed) = SyntheticCamera::new();
        feed.stay_busy(true);
        let handle = CaptureWorker::spawn(Box::new(camera), cfg.clone(), sink(&cfg)).unwrap();

        assert!(feed.wait_armed(Duration::from_secs(5)));
        handle.cancel();
        assert!(wait_until(|| handle.is_finished()));
        assert!(matches!(handle.stop(), Err(CaptureError::ShutdownTimeout { ms: 20 })));
        assert_eq!(feed.ledger().outstanding(), 0);
    }

    #[test]
    fn run_on_current_thread_with_presignalled_cancel() {
        let cfg = config();
        let (camera, feed) = SyntheticCamera::new();
        let worker = CaptureWorker::new(Box::new(camera), cfg.clone(), sink(&cfg));
        worker.cancel_token().cancel();
        let report = worker.run().unwrap();
        assert_eq!(report, CaptureReport::default());
        assert_eq!(feed.calls("stop_capture"), 1);
        assert_eq!(feed.ledger().outstanding(), 0);
    }
}
