use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Capture resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Top screen of the handheld the scanner was first written for.
    pub const TOP_LCD: Self = Self { width: 400, height: 240 };
    pub const VGA: Self = Self { width: 640, height: 480 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of one frame at this resolution.
    pub fn frame_len(&self, format: PixelFormat) -> usize {
        self.total_pixels() * format.bytes_per_pixel()
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - PixelFormat

/// Pixel layout of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 16-bit little-endian, 5 bits red, 6 green, 5 blue (red in the high bits).
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb565 => 2,
        }
    }
}

// MARK: - ScanState

/// What the scan session is doing right now. Read by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Ready,
    Downloading,
    Installing,
}

impl ScanState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "State: READY",
            Self::Downloading => "State: DOWNLOADING",
            Self::Installing => "State: INSTALLING",
        }
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// MARK: - ResultCode

/// Numeric outcome of the last download or install attempt. `0` is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const OK: Self = Self(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Result code: 0x{:08X}", self.0)
    }
}

// MARK: - PackageId

/// Identifier the package store assigns to an installable package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId(pub u64);

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_accounts_for_bytes_per_pixel() {
        assert_eq!(Resolution::TOP_LCD.frame_len(PixelFormat::Rgb565), 400 * 240 * 2);
    }

    #[test]
    fn result_code_formats_like_the_status_bar() {
        assert_eq!(ResultCode(0x17).to_string(), "Result code: 0x00000017");
        assert!(ResultCode::OK.is_ok());
    }
}
