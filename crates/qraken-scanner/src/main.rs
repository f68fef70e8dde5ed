use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use qraken_capture::CaptureDevice;
use qraken_core::ScannerConfig;
use qraken_fetch::{Downloader, ReqwestStack};
use qraken_scanner::{DirectoryStore, ExitFlag, Installer, RqrrEngine, Scanner};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG=debug for more detail, GST_DEBUG=3 for GStreamer
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("QRaken v{}", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => {
            info!("QRaken exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

fn load_config() -> Result<ScannerConfig> {
    let mut cfg = match std::env::var_os("QRAKEN_CONFIG") {
        Some(path) => ScannerConfig::from_file(&PathBuf::from(path)).context("loading QRAKEN_CONFIG")?,
        None => ScannerConfig::default(),
    };
    if std::env::var("QRAKEN_INSECURE_TLS").is_ok_and(|v| v == "1") {
        cfg.insecure_tls = true;
    }
    if cfg.insecure_tls {
        warn!("insecure_tls is set: package downloads skip TLS certificate verification");
    }
    Ok(cfg)
}

fn run() -> Result<()> {
    let cfg = load_config()?;
    let (device, _replay) = open_camera(&cfg)?;

    let downloader = Downloader::from_config(Box::new(ReqwestStack::new()), &cfg);
    let installer = Installer::new(DirectoryStore::new(&cfg.store_dir, cfg.package_extension.clone()));
    let mut scanner = Scanner::new(&cfg, device, RqrrEngine::new(cfg.resolution), downloader, installer);

    let exit = ExitFlag::new();
    spawn_exit_listener(exit.clone())?;
    info!("Scanning for QR codes; press Enter to exit. {}", scanner.status().get().state);

    let cadence = Duration::from_secs(1) / cfg.frame_rate.max(1);
    let report = scanner.run(exit, cadence).context("scan session failed")?;
    info!("Session over: {} frames captured, {} overruns", report.frames, report.overruns);
    Ok(())
}

/// Enter or end of stdin ends the session.
fn spawn_exit_listener(exit: ExitFlag) -> Result<()> {
    thread::Builder::new()
        .name("qraken-exit".into())
        .spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            exit.trigger();
        })
        .context("spawning exit listener")?;
    Ok(())
}

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
fn open_camera(_cfg: &ScannerConfig) -> Result<(Box<dyn CaptureDevice>, Option<qraken_scanner::ReplayFeeder>)> {
    let path = std::env::var("QRAKEN_CAMERA").unwrap_or_else(|_| "/dev/video0".to_owned());
    info!("Camera: {}", path);
    Ok((Box::new(qraken_capture::GstCamera::new(path)), None))
}

#[cfg(not(all(feature = "gstreamer", target_os = "linux")))]
fn open_camera(cfg: &ScannerConfig) -> Result<(Box<dyn CaptureDevice>, Option<qraken_scanner::ReplayFeeder>)> {
    use qraken_capture::SyntheticCamera;
    use qraken_scanner::replay::load_frames;

    let dir = std::env::var_os("QRAKEN_REPLAY_DIR")
        .map(PathBuf::from)
        .context("no camera backend: set QRAKEN_REPLAY_DIR or build with --features gstreamer")?;
    let frames = load_frames(&dir, cfg.resolution)
        .with_context(|| format!("loading replay frames from {}", dir.display()))?;

    let (camera, feed) = SyntheticCamera::new();
    let feeder = qraken_scanner::ReplayFeeder::spawn(feed, frames, cfg.frame_rate)
        .context("spawning replay thread")?;
    Ok((Box::new(camera), Some(feeder)))
}
