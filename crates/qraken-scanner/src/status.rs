//! Scan session status shared with the presentation layer.

use std::sync::{Arc, Mutex, MutexGuard};

use qraken_core::{ResultCode, ScanError, ScanState};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatus {
    pub state: ScanState,
    /// Outcome of the last download or install attempt.
    pub last_result: ResultCode,
    /// Decode passes run.
    pub frames_scanned: u64,
    /// Passes that found at least one symbol.
    pub symbols_seen: u64,
}

/// Cloneable handle to one session's [`ScanStatus`].
#[derive(Debug, Clone, Default)]
pub struct SharedStatus {
    inner: Arc<Mutex<ScanStatus>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status.
    pub fn get(&self) -> ScanStatus {
        *self.lock()
    }

    pub fn set_state(&self, state: ScanState) {
        let mut status = self.lock();
        if status.state != state {
            info!("{}", state.label());
            status.state = state;
        }
    }

    pub fn record_ok(&self) {
        self.set_last_result(ResultCode::OK);
    }

    pub fn set_last_result(&self, code: ResultCode) {
        self.lock().last_result = code;
    }

    pub fn record_error(&self, err: &ScanError) {
        let code = err.code();
        warn!("{} ({})", err, code);
        self.lock().last_result = code;
    }

    pub(crate) fn count_frame(&self, symbols_found: bool) {
        let mut status = self.lock();
        status.frames_scanned += 1;
        if symbols_found {
            status.symbols_seen += 1;
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScanStatus> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
