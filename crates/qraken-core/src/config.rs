use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;
use crate::types::{PixelFormat, Resolution};

/// How the capture worker treats a failing device configuration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPolicy {
    /// Abort capture startup on the first failing call.
    #[default]
    Strict,
    /// Log the failure and keep going; for cameras that reject some settings.
    BestEffort,
}

/// Scanner configuration. Every field has a default, so an empty JSON object is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    // Capture
    pub resolution: Resolution,
    #[serde(alias = "pixelFormat")]
    pub pixel_format: PixelFormat,
    #[serde(alias = "frameRate")]
    pub frame_rate: u32,
    #[serde(alias = "noiseFilter")]
    pub noise_filter: bool,
    #[serde(alias = "autoExposure")]
    pub auto_exposure: bool,
    #[serde(alias = "autoWhiteBalance")]
    pub auto_white_balance: bool,
    #[serde(alias = "setupPolicy")]
    pub setup_policy: SetupPolicy,
    #[serde(alias = "shutdownTimeoutMs")]
    pub shutdown_timeout_ms: u64,
    #[serde(alias = "shutdownPollMs")]
    pub shutdown_poll_ms: u64,

    // Decode
    #[serde(alias = "packageExtension")]
    pub package_extension: String,

    // Network
    #[serde(alias = "userAgent")]
    pub user_agent: String,
    #[serde(alias = "maxRedirects")]
    pub max_redirects: u32,
    /// Disables TLS peer verification. Only for targets without a usable trust store.
    #[serde(alias = "insecureTls")]
    pub insecure_tls: bool,
    #[serde(alias = "scratchSize")]
    pub scratch_size: usize,
    #[serde(alias = "receiveChunk")]
    pub receive_chunk: usize,
    /// Overall limit for one request, in seconds. 0 keeps the client default.
    #[serde(alias = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
    /// Cap on the receive buffer's capacity, in bytes. 0 means no cap.
    #[serde(alias = "maxBufferSize")]
    pub max_buffer_size: usize,

    // Filesystem
    #[serde(alias = "tempPath")]
    pub temp_path: PathBuf,
    #[serde(alias = "storeDir")]
    pub store_dir: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::TOP_LCD,
            pixel_format: PixelFormat::Rgb565,
            frame_rate: 30,
            noise_filter: true,
            auto_exposure: true,
            auto_white_balance: true,
            setup_policy: SetupPolicy::Strict,
            shutdown_timeout_ms: 2_000,
            shutdown_poll_ms: 1,
            package_extension: ".cia".to_owned(),
            user_agent: format!("QRaken/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 50,
            insecure_tls: false,
            scratch_size: 0x10_0000,
            receive_chunk: 100 * 1024,
            request_timeout_secs: 0,
            max_buffer_size: 0,
            temp_path: std::env::temp_dir().join("qraken-download.cia"),
            store_dir: PathBuf::from("qraken-store"),
        }
    }
}

impl ScannerConfig {
    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cfg.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid { reason: format!("resolution {} is empty", self.resolution) });
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid { reason: "frame_rate must be positive".into() });
        }
        if self.receive_chunk == 0 || self.receive_chunk > self.scratch_size {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "receive_chunk {} must be within scratch_size {}",
                    self.receive_chunk, self.scratch_size
                ),
            });
        }
        if !self.package_extension.starts_with('.') {
            return Err(ConfigError::Invalid {
                reason: format!("package_extension {:?} must start with '.'", self.package_extension),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn buffer_limit(&self) -> Option<usize> {
        (self.max_buffer_size > 0).then_some(self.max_buffer_size)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms.max(1))
    }
}
