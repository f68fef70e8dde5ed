//! qraken-fetch
//!
//! Streamed HTTP(S) download of a package of unknown size into a growable
//! buffer, then into the temporary file the installer reads.
//!
//! ```text
//! NetworkStack::init ─► HttpSession::get ─chunks─► StreamBuffer ─► temp file
//! ```

pub mod downloader;
pub mod http;
pub mod stream_buffer;

pub use downloader::Downloader;
pub use http::{FetchOptions, HttpSession, NetworkStack, ReqwestStack};
pub use stream_buffer::{StreamBuffer, INITIAL_CAPACITY};
