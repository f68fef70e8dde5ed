pub mod config;
pub mod errors;
pub mod types;

pub use config::{ScannerConfig, SetupPolicy};
pub use errors::{
    codes, CaptureError, ConfigError, DecodeError, DeviceError, DownloadError, InstallError,
    ScanError, StoreError, TransferError,
};
pub use types::*;
