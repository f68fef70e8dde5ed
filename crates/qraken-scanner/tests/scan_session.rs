//! Full scan sessions over a synthetic camera, a canned network and a
//! recording package store. Most use a scripted decode engine; one renders a
//! real QR code into the camera frames and decodes it with `rqrr`.

use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use qraken_capture::{SyntheticCamera, SyntheticFeed};
use qraken_core::{
    codes, CaptureError, DecodeError, DownloadError, PackageId, Resolution, ResultCode, ScanState, ScannerConfig,
    SetupPolicy, StoreError, TransferError,
};
use qraken_fetch::{Downloader, FetchOptions, HttpSession, NetworkStack};
use qraken_scanner::{
    DecodeEngine, DecodeImage, Installer, PackageStore, RqrrEngine, Scanner, Step, INSTALL_CHUNK,
};
use qrcode::{Color, QrCode};

const URL: &str = "http://example.test/app.cia";
const RES: Resolution = Resolution { width: 16, height: 8 };

// ── Scripted decode engine ────────────────────────────────────────────────────

/// Reports one symbol whenever the whole image is bright. A white RGB565
/// frame converts to 249, a black one to 0.
struct BrightFrameEngine {
    image: Vec<u8>,
    payload: Bytes,
    found: bool,
}

impl BrightFrameEngine {
    fn new(payload: &[u8]) -> Self {
        Self { image: vec![0; RES.total_pixels()], payload: Bytes::copy_from_slice(payload), found: false }
    }
}

impl DecodeEngine for BrightFrameEngine {
    type Symbol = ();

    fn begin(&mut self) -> DecodeImage<'_> {
        DecodeImage { pixels: &mut self.image, width: RES.width, height: RES.height }
    }

    fn end(&mut self) {
        self.found = self.image.iter().all(|&v| v >= 200);
    }

    fn symbol_count(&self) -> usize {
        usize::from(self.found)
    }

    fn extract(&self, index: usize) -> Result<(), DecodeError> {
        if self.found && index == 0 {
            Ok(())
        } else {
            Err(DecodeError::NoSymbol(index))
        }
    }

    fn decode(&self, _symbol: &()) -> Result<Bytes, DecodeError> {
        Ok(self.payload.clone())
    }
}

// ── Canned network ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct CannedNet {
    body: Vec<u8>,
    status: Option<u16>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl NetworkStack for CannedNet {
    fn init(&mut self, _options: &FetchOptions) -> Result<Box<dyn HttpSession>, DownloadError> {
        Ok(Box::new(self.clone()))
    }
}

impl HttpSession for CannedNet {
    fn get(&mut self, url: &str, write: &mut dyn FnMut(&[u8]) -> usize) -> Result<(), TransferError> {
        self.urls.lock().unwrap().push(url.to_owned());
        if let Some(status) = self.status {
            return Err(TransferError::Status(status));
        }
        for chunk in self.body.chunks(1500) {
            if write(chunk) < chunk.len() {
                return Err(TransferError::WriteAborted { accepted: 0 });
            }
        }
        Ok(())
    }
}

// ── Recording store ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    writes: Vec<(u64, Vec<u8>)>,
    installs: usize,
}

#[derive(Clone, Default)]
struct RecordingStore(Arc<Mutex<Recorded>>);

impl PackageStore for RecordingStore {
    type Installed = PackageId;
    type Pending = ();

    fn inspect(&mut self, _package: &mut File) -> Result<PackageId, StoreError> {
        Ok(PackageId(1))
    }

    fn find_installed(&mut self, _id: PackageId) -> Result<Option<PackageId>, StoreError> {
        Ok(None)
    }

    fn delete(&mut self, _installed: PackageId) -> Result<(), StoreError> {
        Ok(())
    }

    fn begin_install(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn write(&mut self, _pending: &mut (), offset: u64, bytes: &[u8]) -> Result<(), StoreError> {
        self.0.lock().unwrap().writes.push((offset, bytes.to_vec()));
        Ok(())
    }

    fn finish_install(&mut self, _pending: ()) -> Result<(), StoreError> {
        self.0.lock().unwrap().installs += 1;
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Session<E: DecodeEngine = BrightFrameEngine> {
    scanner: Scanner<E, RecordingStore>,
    feed: SyntheticFeed,
    urls: Arc<Mutex<Vec<String>>>,
    store: RecordingStore,
    temp_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn session(payload: &[u8], net: CannedNet, policy: SetupPolicy) -> Session {
    session_with(BrightFrameEngine::new(payload), RES, net, policy)
}

fn session_with<E: DecodeEngine>(
    engine: E,
    resolution: Resolution,
    net: CannedNet,
    policy: SetupPolicy,
) -> Session<E> {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ScannerConfig {
        resolution,
        setup_policy: policy,
        shutdown_timeout_ms: 500,
        temp_path: dir.path().join("download.cia"),
        ..ScannerConfig::default()
    };
    let (camera, feed) = SyntheticCamera::new();
    let urls = Arc::clone(&net.urls);
    let store = RecordingStore::default();
    let downloader = Downloader::from_config(Box::new(net), &cfg);
    let scanner = Scanner::new(
        &cfg,
        Box::new(camera),
        engine,
        downloader,
        Installer::new(store.clone()),
    );
    Session { scanner, feed, urls, store, temp_path: cfg.temp_path.clone(), _dir: dir }
}

fn solid_frame(px: u16) -> Vec<u8> {
    px.to_le_bytes().repeat(RES.total_pixels())
}

fn never() -> impl FnMut() -> bool {
    || false
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// White RGB565 frame with `text` drawn as a QR code, 4 pixels per module.
fn qr_frame(text: &str, res: Resolution) -> Vec<u8> {
    const SCALE: usize = 4;
    const OFFSET: usize = 20;
    let code = QrCode::new(text.as_bytes()).unwrap();
    let modules = code.width();
    let width = res.width as usize;
    let mut frame = 0xFFFFu16.to_le_bytes().repeat(res.total_pixels());
    for (i, color) in code.to_colors().iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let (mx, my) = (i % modules, i / modules);
        for y in OFFSET + my * SCALE..OFFSET + (my + 1) * SCALE {
            for x in OFFSET + mx * SCALE..OFFSET + (mx + 1) * SCALE {
                let at = (y * width + x) * 2;
                frame[at..at + 2].fill(0);
            }
        }
    }
    frame
}

impl<E: DecodeEngine> Session<E> {
    /// Push `frame` and wait until the capture worker has copied it into the sink.
    fn show(&self, frame: &[u8]) {
        assert!(self.feed.wait_armed(Duration::from_secs(5)));
        assert!(self.feed.push_frame(frame));
        let sink = self.scanner.frame_sink();
        wait_until(|| sink.read(|f| f == frame));
    }

    fn step(&mut self) -> Step {
        self.scanner.step(&mut never()).unwrap()
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn scanned_package_url_is_downloaded_once_and_installed_in_chunks() {
    let body: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 256) as u8).collect();
    let net = CannedNet { body: body.clone(), ..CannedNet::default() };
    let mut s = session(URL.as_bytes(), net, SetupPolicy::Strict);
    let status = s.scanner.status();

    // First step starts capture; the sink is still black.
    assert_eq!(s.step(), Step::Continue);
    assert!(s.urls.lock().unwrap().is_empty());

    s.show(&solid_frame(0xFFFF));
    assert_eq!(s.step(), Step::Continue);

    s.show(&solid_frame(0x0000));
    assert_eq!(s.step(), Step::Continue);

    assert_eq!(*s.urls.lock().unwrap(), vec![URL.to_string()]);
    let recorded = s.store.0.lock().unwrap();
    assert_eq!(recorded.installs, 1);

    let mut expected_offset = 0u64;
    let mut installed = Vec::new();
    for (offset, bytes) in &recorded.writes {
        assert_eq!(*offset, expected_offset);
        assert!(!bytes.is_empty() && bytes.len() <= INSTALL_CHUNK);
        expected_offset += bytes.len() as u64;
        installed.extend_from_slice(bytes);
    }
    assert_eq!(installed, body);
    assert_eq!(recorded.writes.len(), 3);
    drop(recorded);

    let seen = status.get();
    assert_eq!(seen.state, ScanState::Ready);
    assert_eq!(seen.last_result, ResultCode::OK);
    assert_eq!(seen.symbols_seen, 1);
    assert!(!s.temp_path.exists(), "temporary package removed after install");
}

#[test]
fn qr_code_in_camera_frame_is_decoded_downloaded_and_installed() {
    let res = Resolution::new(200, 160);
    let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let net = CannedNet { body: body.clone(), ..CannedNet::default() };
    let mut s = session_with(RqrrEngine::new(res), res, net, SetupPolicy::Strict);

    assert_eq!(s.step(), Step::Continue);
    s.show(&qr_frame(URL, res));
    assert_eq!(s.step(), Step::Continue);

    assert_eq!(*s.urls.lock().unwrap(), vec![URL.to_string()]);
    let recorded = s.store.0.lock().unwrap();
    assert_eq!(recorded.installs, 1);
    let installed: Vec<u8> = recorded.writes.iter().flat_map(|(_, b)| b.iter().copied()).collect();
    assert_eq!(installed, body);
    drop(recorded);

    let seen = s.scanner.status().get();
    assert_eq!(seen.symbols_seen, 1);
    assert_eq!(seen.last_result, ResultCode::OK);
}

#[test]
fn exact_multiple_payload_ends_on_a_full_chunk() {
    let body = vec![0x5A; 2 * INSTALL_CHUNK];
    let net = CannedNet { body, ..CannedNet::default() };
    let mut s = session(URL.as_bytes(), net, SetupPolicy::Strict);

    s.step();
    s.show(&solid_frame(0xFFFF));
    s.step();

    let recorded = s.store.0.lock().unwrap();
    let lens: Vec<usize> = recorded.writes.iter().map(|(_, b)| b.len()).collect();
    assert_eq!(lens, vec![INSTALL_CHUNK, INSTALL_CHUNK]);
}

#[test]
fn extension_check_ignores_case_but_download_keeps_payload() {
    let url = "HTTP://Example.test/App.CIA";
    let net = CannedNet { body: vec![1, 2, 3], ..CannedNet::default() };
    let mut s = session(url.as_bytes(), net, SetupPolicy::Strict);

    s.step();
    s.show(&solid_frame(0xFFFF));
    s.step();

    assert_eq!(*s.urls.lock().unwrap(), vec![url.to_string()]);
}

#[test]
fn non_package_and_non_utf8_payloads_are_ignored() {
    for payload in [&b"https://example.test/readme.txt"[..], &[0xFF, 0xFE, 0x2E, 0x63][..]] {
        let mut s = session(payload, CannedNet::default(), SetupPolicy::Strict);
        s.step();
        s.show(&solid_frame(0xFFFF));
        s.step();

        assert!(s.urls.lock().unwrap().is_empty());
        assert_eq!(s.store.0.lock().unwrap().installs, 0);
        assert_eq!(s.scanner.status().get().state, ScanState::Ready);
    }
}

#[test]
fn failed_download_records_code_and_skips_install() {
    let net = CannedNet { status: Some(404), ..CannedNet::default() };
    let mut s = session(URL.as_bytes(), net, SetupPolicy::Strict);

    s.step();
    s.show(&solid_frame(0xFFFF));
    s.step();

    let seen = s.scanner.status().get();
    assert_eq!(seen.last_result, ResultCode(codes::HTTP_RETURNED_ERROR));
    assert_eq!(seen.state, ScanState::Ready);
    assert_eq!(s.store.0.lock().unwrap().installs, 0);
    assert!(!s.temp_path.exists());
}

#[test]
fn exit_request_stops_capture_and_closes_every_handle() {
    let mut s = session(URL.as_bytes(), CannedNet::default(), SetupPolicy::Strict);
    s.step();
    s.show(&solid_frame(0x0000));
    s.show(&solid_frame(0x1234));

    let opened = s.feed.ledger().opened();
    assert!(opened >= 2, "buffer-error registration plus at least one receive");

    let step = s.scanner.step(&mut || true).unwrap();
    match step {
        Step::Exited(report) => assert!(report.frames >= 2),
        Step::Continue => panic!("exit was requested"),
    }
    assert_eq!(s.feed.ledger().outstanding(), 0);
    assert_eq!(s.feed.calls("shutdown"), 1);
    assert!(!s.feed.is_capturing());

    // Further steps have nothing left to do.
    assert!(matches!(s.step(), Step::Exited(_)));
    assert_eq!(s.feed.calls("shutdown"), 1);
}

#[test]
fn run_until_exit_after_some_steps() {
    let mut s = session(URL.as_bytes(), CannedNet::default(), SetupPolicy::Strict);
    let mut steps = 0;
    let report = s
        .scanner
        .run(
            move || {
                steps += 1;
                steps > 20
            },
            Duration::from_millis(1),
        )
        .unwrap();
    assert_eq!(report.overruns, 0);
    assert_eq!(s.feed.ledger().outstanding(), 0);
    assert_eq!(s.scanner.status().get().frames_scanned, 20);
}

#[test]
fn capture_setup_failure_ends_the_session() {
    let mut s = session(URL.as_bytes(), CannedNet::default(), SetupPolicy::Strict);
    s.feed.fail_on("set_frame_rate");

    let err = s.scanner.run(never(), Duration::from_millis(1)).unwrap_err();
    assert_eq!(err.code(), ResultCode(codes::CAPTURE_SETUP));
    assert_eq!(s.scanner.status().get().last_result, ResultCode(codes::CAPTURE_SETUP));
    assert_eq!(s.feed.ledger().outstanding(), 0);
}

#[test]
fn capture_thread_panic_ends_the_session() {
    let mut s = session(URL.as_bytes(), CannedNet::default(), SetupPolicy::Strict);
    s.feed.panic_on("start_capture");

    let err = s.scanner.run(never(), Duration::from_millis(1)).unwrap_err();
    assert!(matches!(err, CaptureError::Panicked));
    assert_eq!(s.scanner.status().get().last_result, ResultCode(codes::CAPTURE_DEVICE));
    assert_eq!(s.feed.ledger().outstanding(), 0);
}
