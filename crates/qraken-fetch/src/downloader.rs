//! `Downloader`: fetch a package into the temporary file.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use qraken_core::{DownloadError, ScannerConfig};
use tracing::{info, warn};

use crate::http::{FetchOptions, NetworkStack};
use crate::stream_buffer::StreamBuffer;

pub struct Downloader {
    stack: Box<dyn NetworkStack>,
    options: FetchOptions,
    temp_path: PathBuf,
    buffer: StreamBuffer,
}

impl Downloader {
    pub fn new(stack: Box<dyn NetworkStack>, options: FetchOptions, temp_path: impl Into<PathBuf>) -> Self {
        let buffer = match options.buffer_limit {
            Some(limit) => StreamBuffer::with_limit(limit),
            None => StreamBuffer::new(),
        };
        Self { stack, options, temp_path: temp_path.into(), buffer }
    }

    pub fn from_config(stack: Box<dyn NetworkStack>, cfg: &ScannerConfig) -> Self {
        Self::new(stack, FetchOptions::from(cfg), cfg.temp_path.clone())
    }

    /// Where a successful download is written.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// The accumulation buffer. Empty between downloads.
    pub fn buffer(&self) -> &StreamBuffer {
        &self.buffer
    }

    /// Fetch `url` and write the whole body to [`temp_path`](Self::temp_path).
    ///
    /// Returns the number of bytes written. The temporary file is only
    /// created when the transfer succeeded. The accumulation buffer is
    /// emptied on every path.
    pub fn download(&mut self, url: &str) -> Result<u64, DownloadError> {
        let started = Instant::now();
        let mut session = self.stack.init(&self.options)?;

        let buffer = &mut self.buffer;
        let transfer = session.get(url, &mut |chunk| buffer.accept(chunk));
        drop(session);

        let outcome = match transfer {
            Ok(()) => persist(&self.temp_path, self.buffer.as_slice()),
            Err(e) => Err(DownloadError::Transfer(e)),
        };
        let received = self.buffer.written();
        self.buffer.reset();

        match &outcome {
            Ok(bytes) => info!(
                "Downloaded {} bytes from {} in {:?} → {}",
                bytes,
                url,
                started.elapsed(),
                self.temp_path.display()
            ),
            Err(e) => warn!("Download of {} failed after {} bytes: {}", url, received, e),
        }
        outcome
    }
}

fn persist(path: &Path, data: &[u8]) -> Result<u64, DownloadError> {
    let to_err = |source| DownloadError::Persist { path: path.display().to_string(), source };
    let mut file = File::create(path).map_err(to_err)?;
    file.write_all(data).map_err(to_err)?;
    file.flush().map_err(to_err)?;
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpSession;
    use qraken_core::TransferError;
    use std::sync::{Arc, Mutex};

    /// Replies with fixed chunks, or a fixed error, and records every URL.
    #[derive(Clone, Default)]
    struct CannedStack {
        chunks: Vec<Vec<u8>>,
        fail_init: bool,
        fail_with: Option<u16>,
        urls: Arc<Mutex<Vec<String>>>,
        inits: Arc<Mutex<usize>>,
    }

    impl NetworkStack for CannedStack {
        fn init(&mut self, _options: &FetchOptions) -> Result<Box<dyn HttpSession>, DownloadError> {
            *self.inits.lock().unwrap() += 1;
            if self.fail_init {
                return Err(DownloadError::NetworkInit { reason: "no scratch".into() });
            }
            Ok(Box::new(self.clone()))
        }
    }

    impl HttpSession for CannedStack {
        fn get(&mut self, url: &str, write: &mut dyn FnMut(&[u8]) -> usize) -> Result<(), TransferError> {
            self.urls.lock().unwrap().push(url.to_owned());
            if let Some(status) = self.fail_with {
                return Err(TransferError::Status(status));
            }
            for chunk in &self.chunks {
                let accepted = write(chunk);
                if accepted < chunk.len() {
                    return Err(TransferError::WriteAborted { accepted });
                }
            }
            Ok(())
        }
    }

    #[test]
    fn body_lands_in_temp_file_and_buffer_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.cia");
        let stack = CannedStack {
            chunks: vec![vec![1; 3000], vec![2; 3000], vec![3; 5]],
            ..CannedStack::default()
        };
        let urls = Arc::clone(&stack.urls);
        let mut dl = Downloader::new(Box::new(stack), FetchOptions::default(), &path);

        assert_eq!(dl.download("http://example.test/app.cia").unwrap(), 6005);
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 6005);
        assert_eq!(&written[2999..3001], &[1, 2]);
        assert_eq!(written[6004], 3);
        assert_eq!((dl.buffer().written(), dl.buffer().capacity()), (0, 0));
        assert_eq!(*urls.lock().unwrap(), vec!["http://example.test/app.cia".to_string()]);
    }

    #[test]
    fn transfer_failure_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.cia");
        let stack = CannedStack { fail_with: Some(404), ..CannedStack::default() };
        let mut dl = Downloader::new(Box::new(stack), FetchOptions::default(), &path);

        let err = dl.download("http://example.test/missing.cia").unwrap_err();
        assert_eq!(err.code().0, 22);
        assert!(!path.exists());
        assert_eq!(dl.buffer().capacity(), 0);
    }

    #[test]
    fn init_failure_stops_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let stack = CannedStack { fail_init: true, ..CannedStack::default() };
        let urls = Arc::clone(&stack.urls);
        let mut dl = Downloader::new(Box::new(stack), FetchOptions::default(), dir.path().join("t"));

        let err = dl.download("http://example.test/app.cia").unwrap_err();
        assert_eq!(err.code().0, 0xFFFF_FFFF);
        assert!(urls.lock().unwrap().is_empty());
    }

    #[test]
    fn unwritable_temp_path_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("tmp.cia");
        let stack = CannedStack { chunks: vec![vec![0; 10]], ..CannedStack::default() };
        let mut dl = Downloader::new(Box::new(stack), FetchOptions::default(), &path);

        let err = dl.download("http://example.test/app.cia").unwrap_err();
        assert!(matches!(err, DownloadError::Persist { .. }));
        assert_eq!(err.code().0, 23);
        assert_eq!(dl.buffer().written(), 0);
    }

    #[test]
    fn body_past_the_buffer_cap_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.cia");
        let stack = CannedStack { chunks: vec![vec![1; 6000], vec![2; 6000]], ..CannedStack::default() };
        let options = FetchOptions { buffer_limit: Some(8192), ..FetchOptions::default() };
        let mut dl = Downloader::new(Box::new(stack), options, &path);

        let err = dl.download("http://example.test/big.cia").unwrap_err();
        assert!(matches!(err, DownloadError::Transfer(TransferError::WriteAborted { accepted: 0 })));
        assert_eq!(err.code().0, 23);
        assert!(!path.exists());
        assert_eq!(dl.buffer().capacity(), 0);
    }

    #[test]
    fn consecutive_downloads_start_from_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.cia");
        let stack = CannedStack { chunks: vec![vec![7; 5000]], ..CannedStack::default() };
        let inits = Arc::clone(&stack.inits);
        let mut dl = Downloader::new(Box::new(stack), FetchOptions::default(), &path);

        dl.download("http://example.test/a.cia").unwrap();
        dl.download("http://example.test/b.cia").unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 5000);
        assert_eq!(*inits.lock().unwrap(), 2);
    }
}
