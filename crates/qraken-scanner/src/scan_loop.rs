//! `Scanner`: the decode loop on the calling thread.
//!
//! Each [`step`](Scanner::step):
//! 1. honour an exit request: cancel the capture worker and wait for it
//! 2. start the capture worker on the first step
//! 3. stop if the worker finished on its own
//! 4. convert the latest frame to grayscale and run the decode engine
//! 5. on a package URL: download, install, remove the temporary file
//!
//! The download and install run synchronously, so there is never more than
//! one in flight. Capture keeps running meanwhile; frames are simply not read.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use qraken_capture::{CaptureConfig, CaptureDevice, CaptureHandle, CaptureReport, CaptureWorker, FrameSink};
use qraken_core::{CaptureError, ScanError, ScanState, ScannerConfig};
use qraken_fetch::Downloader;
use tracing::{debug, info, trace, warn};

use crate::convert::rgb565_frame_to_luma;
use crate::decode::DecodeEngine;
use crate::install::{Installer, PackageStore};
use crate::status::SharedStatus;

// ── Exit signal ───────────────────────────────────────────────────────────────

/// The user's request to end the session, polled once per step.
pub trait ExitSignal {
    fn exit_requested(&mut self) -> bool;
}

impl<F: FnMut() -> bool> ExitSignal for F {
    fn exit_requested(&mut self) -> bool {
        self()
    }
}

/// Exit signal that another thread can trigger.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag(Arc<AtomicBool>);

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ExitSignal for ExitFlag {
    fn exit_requested(&mut self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Result of one [`Scanner::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The session is over; the worker has been joined.
    Exited(CaptureReport),
}

pub struct Scanner<E: DecodeEngine, S: PackageStore> {
    capture_config: CaptureConfig,
    device: Option<Box<dyn CaptureDevice>>,
    sink: Arc<FrameSink>,
    capture: Option<CaptureHandle>,
    engine: E,
    downloader: Downloader,
    installer: Installer<S>,
    status: SharedStatus,
    extension: String,
}

impl<E: DecodeEngine, S: PackageStore> Scanner<E, S> {
    pub fn new(
        cfg: &ScannerConfig,
        device: Box<dyn CaptureDevice>,
        engine: E,
        downloader: Downloader,
        installer: Installer<S>,
    ) -> Self {
        Self {
            capture_config: CaptureConfig::from(cfg),
            device: Some(device),
            sink: Arc::new(FrameSink::new(cfg.resolution, cfg.pixel_format)),
            capture: None,
            engine,
            downloader,
            installer,
            status: SharedStatus::new(),
            extension: cfg.package_extension.to_lowercase(),
        }
    }

    /// Handle for the presentation layer.
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// The latest-frame buffer, for a preview.
    pub fn frame_sink(&self) -> Arc<FrameSink> {
        Arc::clone(&self.sink)
    }

    /// Run steps until the session ends, sleeping `cadence` between them.
    pub fn run(&mut self, mut exit: impl ExitSignal, cadence: Duration) -> Result<CaptureReport, CaptureError> {
        loop {
            match self.step(&mut exit)? {
                Step::Continue => {
                    if !cadence.is_zero() {
                        thread::sleep(cadence);
                    }
                }
                Step::Exited(report) => return Ok(report),
            }
        }
    }

    /// One decode-loop iteration.
    ///
    /// Errors are session-fatal: the capture thread could not be created,
    /// or it failed or could not be stopped cleanly.
    pub fn step(&mut self, exit: &mut dyn ExitSignal) -> Result<Step, CaptureError> {
        if exit.exit_requested() {
            info!("Exit requested");
            return self.shutdown().map(Step::Exited);
        }

        let finished = match &self.capture {
            Some(handle) => handle.is_finished(),
            None => match self.device.take() {
                Some(device) => {
                    self.start_capture(device)?;
                    false
                }
                None => return Ok(Step::Exited(CaptureReport::default())),
            },
        };
        if finished {
            warn!("Capture worker stopped on its own");
            return self.shutdown().map(Step::Exited);
        }

        if let Some(payload) = self.scan_frame() {
            self.handle_payload(&payload);
        }
        self.status.set_state(ScanState::Ready);
        Ok(Step::Continue)
    }

    fn start_capture(&mut self, device: Box<dyn CaptureDevice>) -> Result<(), CaptureError> {
        match CaptureWorker::spawn(device, self.capture_config.clone(), Arc::clone(&self.sink)) {
            Ok(handle) => {
                debug!("Capture worker started");
                self.capture = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("Could not start capture: {}", e);
                self.status.set_last_result(e.code());
                Err(e)
            }
        }
    }

    /// Cancel the worker and wait until it has released everything.
    fn shutdown(&mut self) -> Result<CaptureReport, CaptureError> {
        let Some(handle) = self.capture.take() else {
            return Ok(CaptureReport::default());
        };
        match handle.stop() {
            Ok(report) => Ok(report),
            Err(e) => {
                let code = e.code();
                warn!("Capture session ended with error: {} ({})", e, code);
                self.status.set_last_result(code);
                Err(e)
            }
        }
    }

    /// Convert the latest frame, decode it, and return the first symbol's payload.
    fn scan_frame(&mut self) -> Option<Bytes> {
        let src_width = self.sink.resolution().width;
        let image = self.engine.begin();
        let size = image.size();
        let pixels = image.pixels;
        self.sink.read(|frame| rgb565_frame_to_luma(frame, src_width, pixels, size));
        self.engine.end();

        let found = self.engine.symbol_count() > 0;
        self.status.count_frame(found);
        if !found {
            return None;
        }

        let decoded = self.engine.extract(0).and_then(|symbol| self.engine.decode(&symbol));
        match decoded {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!("Symbol found but not decoded: {}", e);
                self.status.record_error(&ScanError::from(e));
                None
            }
        }
    }

    fn handle_payload(&mut self, payload: &[u8]) {
        let Ok(url) = std::str::from_utf8(payload) else {
            warn!("Ignoring non-UTF-8 payload ({} bytes)", payload.len());
            return;
        };
        if !url.to_lowercase().ends_with(&self.extension) {
            trace!("Ignoring payload {:?}", url);
            return;
        }

        info!("Package URL scanned: {}", url);
        self.status.set_state(ScanState::Downloading);
        match self.downloader.download(url) {
            Ok(_) => {
                self.status.record_ok();
                self.status.set_state(ScanState::Installing);
                match self.installer.install(self.downloader.temp_path()) {
                    Ok(_) => self.status.record_ok(),
                    Err(e) => self.status.record_error(&ScanError::from(e)),
                }
            }
            Err(e) => self.status.record_error(&ScanError::from(e)),
        }
        self.remove_temp_file();
    }

    fn remove_temp_file(&self) {
        let path = self.downloader.temp_path();
        match std::fs::remove_file(path) {
            Ok(()) => trace!("Removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}
