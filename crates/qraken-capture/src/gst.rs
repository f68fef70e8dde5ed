//! V4L2 webcam through GStreamer.
//!
//! # Pipeline
//! ```text
//! v4l2src → videoconvert → videoscale → video/x-raw,format=RGB16 → appsink
//! ```
//! `RGB16` is GStreamer's name for little-endian RGB565. The appsink callback
//! completes whichever receive is armed; samples arriving with nothing armed
//! are dropped. A sample of the wrong size raises the buffer-error signal.
//! Rows are padded to 4 bytes, so odd widths are repacked using the caps stride.

use std::sync::{Arc, Mutex, MutexGuard};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video as gst_video;
use qraken_core::{DeviceError, PixelFormat, Resolution};
use tracing::{debug, info, trace, warn};

use crate::device::{CaptureDevice, ReceiveRequest};
use crate::handle::{Handle, HandleLedger};
use crate::signal::Signal;

#[derive(Default)]
struct Armed {
    receive: Option<ReceiveRequest>,
    overflow: Option<Signal>,
}

pub struct GstCamera {
    device_path: String,
    resolution: Resolution,
    frame_rate: u32,
    pipeline: Option<gst::Pipeline>,
    armed: Arc<Mutex<Armed>>,
    ledger: HandleLedger,
}

fn lock(armed: &Mutex<Armed>) -> MutexGuard<'_, Armed> {
    armed.lock().unwrap_or_else(|p| p.into_inner())
}

impl GstCamera {
    /// Camera at `device_path`, e.g. `/dev/video0`.
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            resolution: Resolution::TOP_LCD,
            frame_rate: 30,
            pipeline: None,
            armed: Arc::new(Mutex::new(Armed::default())),
            ledger: HandleLedger::new(),
        }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    fn pipeline(&self, op: &'static str) -> Result<&gst::Pipeline, DeviceError> {
        self.pipeline.as_ref().ok_or_else(|| DeviceError::new(op, "camera not active"))
    }

    fn build_pipeline(&self) -> Result<gst::Pipeline, DeviceError> {
        let Resolution { width, height } = self.resolution;
        let description = format!(
            "v4l2src device={} \
             ! videoconvert \
             ! videoscale \
             ! video/x-raw,format=RGB16,width={width},height={height},framerate={}/1 \
             ! appsink name=sink sync=false max-buffers=1 drop=true",
            self.device_path, self.frame_rate
        );

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| DeviceError::new("activate", e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| DeviceError::new("activate", "not a pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| DeviceError::new("activate", "no appsink"))?;

        let armed = Arc::clone(&self.armed);
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let info = sample
                        .caps()
                        .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok());
                    let row_len = width as usize * 2;
                    let stride = info.as_ref().and_then(|info| {
                        let shape_ok = info.format() == gst_video::VideoFormat::Rgb16
                            && info.width() == width
                            && info.height() == height;
                        let stride = usize::try_from(*info.stride().first()?).ok()?;
                        (shape_ok && stride >= row_len).then_some(stride)
                    });
                    let needed = stride.map(|s| s * (height as usize).saturating_sub(1) + row_len);

                    let mut state = lock(&armed);
                    let Some(request) = state.receive.take() else {
                        trace!("gst: sample dropped, no receive armed");
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let fits = request.len == row_len * height as usize
                        && needed.is_some_and(|n| map.len() >= n);
                    let Some(stride) = stride.filter(|_| fits) else {
                        debug!("gst: unexpected sample ({} bytes, caps {:?})", map.len(), info);
                        if let Some(overflow) = &state.overflow {
                            overflow.raise();
                        }
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    drop(state);

                    request.buffer.fill_rows(map.as_slice(), stride, row_len);
                    request.ready.raise();
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(pipeline)
    }
}

impl CaptureDevice for GstCamera {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        gst::init().map_err(|e| DeviceError::new("init", e.to_string()))
    }

    fn set_size(&mut self, resolution: Resolution) -> Result<(), DeviceError> {
        self.resolution = resolution;
        Ok(())
    }

    fn set_output_format(&mut self, format: PixelFormat) -> Result<(), DeviceError> {
        match format {
            PixelFormat::Rgb565 => Ok(()),
        }
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<(), DeviceError> {
        if fps == 0 {
            return Err(DeviceError::new("set_frame_rate", "frame rate must be positive"));
        }
        self.frame_rate = fps;
        Ok(())
    }

    // v4l2src exposes none of these uniformly across drivers.
    fn set_noise_filter(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        Err(DeviceError::unsupported("set_noise_filter", "not supported by v4l2src"))
    }

    fn set_auto_exposure(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        Err(DeviceError::unsupported("set_auto_exposure", "not supported by v4l2src"))
    }

    fn set_auto_white_balance(&mut self, _enabled: bool) -> Result<(), DeviceError> {
        Err(DeviceError::unsupported("set_auto_white_balance", "not supported by v4l2src"))
    }

    fn activate(&mut self) -> Result<(), DeviceError> {
        let pipeline = self.build_pipeline()?;
        pipeline
            .set_state(gst::State::Paused)
            .map_err(|_| DeviceError::new("activate", "failed to preroll pipeline"))?;
        info!("GstCamera({}) ready {}", self.device_path, self.resolution);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), DeviceError> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline
                .set_state(gst::State::Null)
                .map_err(|_| DeviceError::new("deactivate", "failed to tear down pipeline"))?;
        }
        Ok(())
    }

    fn register_buffer_error(&mut self, signal: Signal) -> Result<Handle, DeviceError> {
        lock(&self.armed).overflow = Some(signal);
        Ok(self.ledger.open("buffer-error"))
    }

    fn max_transfer_unit(&self, resolution: Resolution) -> Result<u32, DeviceError> {
        // appsink hands over whole frames.
        u32::try_from(resolution.frame_len(PixelFormat::Rgb565))
            .map_err(|_| DeviceError::new("max_transfer_unit", "frame too large"))
    }

    fn set_transfer_unit(&mut self, _unit: u32, _resolution: Resolution) -> Result<(), DeviceError> {
        Ok(())
    }

    fn clear_buffer(&mut self) -> Result<(), DeviceError> {
        lock(&self.armed).receive = None;
        Ok(())
    }

    fn set_receiving(&mut self, request: ReceiveRequest) -> Result<Handle, DeviceError> {
        lock(&self.armed).receive = Some(request);
        Ok(self.ledger.open("receive"))
    }

    fn start_capture(&mut self) -> Result<(), DeviceError> {
        self.pipeline("start_capture")?
            .set_state(gst::State::Playing)
            .map_err(|_| DeviceError::new("start_capture", "failed to start pipeline"))?;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), DeviceError> {
        self.pipeline("stop_capture")?
            .set_state(gst::State::Paused)
            .map_err(|_| DeviceError::new("stop_capture", "failed to pause pipeline"))?;
        Ok(())
    }

    fn is_busy(&self) -> Result<bool, DeviceError> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Ok(false);
        };
        let (_, current, pending) = pipeline.state(gst::ClockTime::ZERO);
        Ok(current == gst::State::Playing || pending == gst::State::Playing)
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.deactivate() {
            warn!("GstCamera({}) shutdown: {}", self.device_path, e);
        }
        let mut armed = lock(&self.armed);
        armed.receive = None;
        armed.overflow = None;
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}
