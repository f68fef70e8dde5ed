//! qraken-capture
//!
//! Camera capture on a dedicated thread, handing frames to the decode loop
//! through a latest-frame buffer.
//!
//! ```text
//!  CaptureDevice ──receive──► RecvBuffer ──copy──► FrameSink ──snapshot──► decode loop
//!        ▲                                                                     │
//!        └───────────── CaptureWorker (own thread) ◄──── CaptureHandle ◄───────┘
//! ```
//!
//! Backends:
//! - [`SyntheticCamera`]: frames pushed in from software (replay, tests)
//! - `GstCamera`: V4L2 webcam through GStreamer, behind the `gstreamer` feature

pub mod device;
pub mod frame_sink;
pub mod handle;
pub mod signal;
pub mod synthetic;
pub mod worker;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub mod gst;

use std::time::Duration;

use qraken_core::{PixelFormat, Resolution, ScannerConfig, SetupPolicy};

pub use device::{CaptureDevice, ReceiveRequest, RecvBuffer};
pub use frame_sink::FrameSink;
pub use handle::{Handle, HandleLedger};
pub use signal::{CancelToken, Signal, WaitSet, WaitSlot};
pub use synthetic::{SyntheticCamera, SyntheticFeed};
pub use worker::{CaptureHandle, CaptureReport, CaptureWorker, WorkerState};

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gst::GstCamera;

/// Settings the capture worker applies to its device.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub frame_rate: u32,
    pub noise_filter: bool,
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
    pub setup_policy: SetupPolicy,
    /// How long to wait for the device to go idle on stop.
    pub shutdown_timeout: Duration,
    /// Sleep between idle checks while stopping.
    pub shutdown_poll: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for CaptureConfig {
    fn from(cfg: &ScannerConfig) -> Self {
        Self {
            resolution: cfg.resolution,
            pixel_format: cfg.pixel_format,
            frame_rate: cfg.frame_rate,
            noise_filter: cfg.noise_filter,
            auto_exposure: cfg.auto_exposure,
            auto_white_balance: cfg.auto_white_balance,
            setup_policy: cfg.setup_policy,
            shutdown_timeout: cfg.shutdown_timeout(),
            shutdown_poll: cfg.shutdown_poll(),
        }
    }
}
