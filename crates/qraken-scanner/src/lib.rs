//! qraken-scanner
//!
//! The scan session: the decode loop reading frames from the capture worker,
//! and the download and install it triggers.
//!
//! ```text
//! FrameSink ─► convert ─► DecodeEngine ─► URL ─► Downloader ─► temp file ─► Installer ─► PackageStore
//! ```

pub mod convert;
pub mod decode;
pub mod install;
pub mod replay;
pub mod scan_loop;
pub mod status;
pub mod store;

pub use decode::{DecodeEngine, DecodeImage, RqrrEngine, RqrrSymbol};
pub use install::{Installer, PackageStore, INSTALL_CHUNK};
pub use replay::ReplayFeeder;
pub use scan_loop::{ExitFlag, ExitSignal, Scanner, Step};
pub use status::{ScanStatus, SharedStatus};
pub use store::DirectoryStore;
