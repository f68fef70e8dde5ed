use thiserror::Error;

use crate::types::ResultCode;

// MARK: - Result codes

/// libcurl-compatible codes, kept so status bars read the same as before.
pub mod codes {
    pub const HTTP_RETURNED_ERROR: u32 = 22;
    pub const WRITE_ERROR: u32 = 23;
    pub const SSL_CONNECT_ERROR: u32 = 35;
    pub const TOO_MANY_REDIRECTS: u32 = 47;
    pub const RECV_ERROR: u32 = 56;
    pub const COULDNT_CONNECT: u32 = 7;

    /// Network stack could not be brought up (scratch allocation or client build).
    pub const NETWORK_INIT: u32 = 0xFFFF_FFFF;

    pub const CAPTURE_SETUP: u32 = 0xE000_0001;
    pub const CAPTURE_SPAWN: u32 = 0xE000_0002;
    pub const CAPTURE_DEVICE: u32 = 0xE000_0003;
    pub const CAPTURE_SHUTDOWN_TIMEOUT: u32 = 0xE000_0004;

    pub const INSTALL_OPEN: u32 = 0xE100_0001;
    pub const INSTALL_READ: u32 = 0xE100_0002;
    pub const STORE_GENERIC: u32 = 0xE100_00FF;

    pub const DECODE_FAILED: u32 = 0xE200_0001;
}

// MARK: - Capture

/// Failure reported by a capture device call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} failed: {reason}")]
pub struct DeviceError {
    pub op: &'static str,
    pub reason: String,
    /// The device has no such control; the call changed nothing.
    pub unsupported: bool,
}

impl DeviceError {
    pub fn new(op: &'static str, reason: impl Into<String>) -> Self {
        Self { op, reason: reason.into(), unsupported: false }
    }

    pub fn unsupported(op: &'static str, reason: impl Into<String>) -> Self {
        Self { op, reason: reason.into(), unsupported: true }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture setup failed: {0}")]
    Setup(DeviceError),

    #[error("Capture device error: {0}")]
    Device(DeviceError),

    #[error("Capture device still busy after {ms}ms")]
    ShutdownTimeout { ms: u64 },

    #[error("Could not start capture thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Capture thread panicked")]
    Panicked,
}

impl CaptureError {
    pub fn code(&self) -> ResultCode {
        ResultCode(match self {
            Self::Setup(_) => codes::CAPTURE_SETUP,
            Self::Device(_) | Self::Panicked => codes::CAPTURE_DEVICE,
            Self::ShutdownTimeout { .. } => codes::CAPTURE_SHUTDOWN_TIMEOUT,
            Self::Spawn(_) => codes::CAPTURE_SPAWN,
        })
    }
}

// MARK: - Network

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Redirect limit of {0} exceeded")]
    Redirects(u32),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Receive buffer refused a chunk after {accepted} bytes")]
    WriteAborted { accepted: usize },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Receive failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer failed: {0}")]
    Other(String),
}

impl TransferError {
    pub fn code(&self) -> ResultCode {
        ResultCode(match self {
            Self::Status(_) => codes::HTTP_RETURNED_ERROR,
            Self::Redirects(_) => codes::TOO_MANY_REDIRECTS,
            Self::Tls(_) => codes::SSL_CONNECT_ERROR,
            Self::WriteAborted { .. } => codes::WRITE_ERROR,
            Self::Connect(_) => codes::COULDNT_CONNECT,
            Self::Io(_) | Self::Other(_) => codes::RECV_ERROR,
        })
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Network init failed: {reason}")]
    NetworkInit { reason: String },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Could not write downloaded package to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn code(&self) -> ResultCode {
        match self {
            Self::NetworkInit { .. } => ResultCode(codes::NETWORK_INIT),
            Self::Transfer(e) => e.code(),
            Self::Persist { .. } => ResultCode(codes::WRITE_ERROR),
        }
    }
}

// MARK: - Package store / install

/// Failure reported by the package store. `code` is the store's own status value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} (code 0x{code:08X})")]
pub struct StoreError {
    pub code: u32,
    pub reason: String,
}

impl StoreError {
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    pub fn generic(reason: impl Into<String>) -> Self {
        Self::new(codes::STORE_GENERIC, reason)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::generic(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Could not open package {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read package info: {0}")]
    Inspect(StoreError),

    #[error("Could not remove previous install: {0}")]
    Delete(StoreError),

    #[error("Could not start install: {0}")]
    Begin(StoreError),

    #[error("Read failed at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed at offset {offset}: {source}")]
    Write {
        offset: u64,
        #[source]
        source: StoreError,
    },

    #[error("Could not finish install: {0}")]
    Finish(StoreError),
}

impl InstallError {
    pub fn code(&self) -> ResultCode {
        ResultCode(match self {
            Self::Open { .. } => codes::INSTALL_OPEN,
            Self::Read { .. } => codes::INSTALL_READ,
            Self::Inspect(e) | Self::Delete(e) | Self::Begin(e) | Self::Finish(e) => e.code,
            Self::Write { source, .. } => source.code,
        })
    }
}

// MARK: - Decode

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("No symbol at index {0}")]
    NoSymbol(usize),

    #[error("Symbol could not be decoded: {reason}")]
    DecodeFailed { reason: String },
}

// MARK: - Config

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },
}

// MARK: - ScanError

/// Everything the scan session can record as its last result.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ScanError {
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Capture(e) => e.code(),
            Self::Download(e) => e.code(),
            Self::Install(e) => e.code(),
            Self::Decode(_) => ResultCode(codes::DECODE_FAILED),
        }
    }
}
