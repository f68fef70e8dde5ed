//! Replays still images as camera frames.
//!
//! Images from a directory are scaled to the capture resolution, packed to
//! little-endian RGB565 and pushed into a [`SyntheticFeed`] in name order,
//! looping, at the configured frame rate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::imageops::FilterType;
use image::{ImageError, RgbImage};
use qraken_capture::SyntheticFeed;
use qraken_core::Resolution;
use tracing::{debug, info, warn};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Pack one 8-bit RGB pixel into RGB565.
pub fn rgb_to_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

/// Scale `img` to `res` and pack it as a little-endian RGB565 frame.
pub fn frame_from_image(img: &RgbImage, res: Resolution) -> Vec<u8> {
    let scaled;
    let img = if img.dimensions() == (res.width, res.height) {
        img
    } else {
        scaled = image::imageops::resize(img, res.width, res.height, FilterType::Triangle);
        &scaled
    };
    img.pixels()
        .flat_map(|p| rgb_to_rgb565(p[0], p[1], p[2]).to_le_bytes())
        .collect()
}

/// Load every image in `dir` as a frame, sorted by file name.
pub fn load_frames(dir: &Path, res: Resolution) -> Result<Vec<Vec<u8>>, ImageError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let img = image::open(path)?.to_rgb8();
        debug!("Replay frame {} ({}x{})", path.display(), img.width(), img.height());
        frames.push(frame_from_image(&img, res));
    }
    info!("Loaded {} replay frame(s) from {}", frames.len(), dir.display());
    Ok(frames)
}

/// Background thread pushing replay frames into a synthetic camera.
///
/// Stops and joins on drop.
pub struct ReplayFeeder {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReplayFeeder {
    pub fn spawn(feed: SyntheticFeed, frames: Vec<Vec<u8>>, frame_rate: u32) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stopping = Arc::clone(&stop);
        let interval = Duration::from_secs(1) / frame_rate.max(1);

        let thread = thread::Builder::new().name("qraken-replay".into()).spawn(move || {
            if frames.is_empty() {
                warn!("No replay frames; camera will stay blank");
                return;
            }
            let mut next = 0;
            while !stopping.load(Ordering::Acquire) {
                if feed.wait_armed(Duration::from_millis(100)) && feed.push_frame(&frames[next]) {
                    next = (next + 1) % frames.len();
                }
                thread::sleep(interval);
            }
        })?;

        Ok(Self { stop, thread: Some(thread) })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Replay thread panicked");
            }
        }
    }
}

impl Drop for ReplayFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}
