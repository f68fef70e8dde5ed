//! Network seam and its `reqwest` implementation.
//!
//! A [`NetworkStack`] is brought up once per download and hands out an
//! [`HttpSession`]. Dropping the session tears the stack down again and
//! releases its scratch memory.

use std::error::Error as StdError;
use std::io::Read;
use std::time::Duration;

use qraken_core::{DownloadError, ScannerConfig, TransferError};
use reqwest::blocking::Client;
use reqwest::redirect;
use tracing::{debug, warn};

/// Client options applied on every [`NetworkStack::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub user_agent: String,
    pub max_redirects: u32,
    /// Skip TLS peer verification.
    pub insecure_tls: bool,
    /// Scratch memory reserved for the session.
    pub scratch_size: usize,
    /// Largest body chunk handed to the write callback at once.
    pub receive_chunk: usize,
    /// Overall request timeout. `None` keeps the client default.
    pub timeout: Option<Duration>,
    /// Cap on the body buffer's capacity.
    pub buffer_limit: Option<usize>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for FetchOptions {
    fn from(cfg: &ScannerConfig) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            max_redirects: cfg.max_redirects,
            insecure_tls: cfg.insecure_tls,
            scratch_size: cfg.scratch_size,
            receive_chunk: cfg.receive_chunk,
            timeout: cfg.request_timeout(),
            buffer_limit: cfg.buffer_limit(),
        }
    }
}

/// Brings up the network for one download.
pub trait NetworkStack {
    /// Fails with [`DownloadError::NetworkInit`] if the stack or its scratch
    /// region cannot be set up.
    fn init(&mut self, options: &FetchOptions) -> Result<Box<dyn HttpSession>, DownloadError>;
}

/// An initialised network stack.
pub trait HttpSession {
    /// GET `url`, handing body chunks to `write` in order.
    ///
    /// `write` returns the number of bytes it accepted; anything short of the
    /// chunk length aborts the transfer with [`TransferError::WriteAborted`].
    fn get(&mut self, url: &str, write: &mut dyn FnMut(&[u8]) -> usize) -> Result<(), TransferError>;
}

// ── reqwest ───────────────────────────────────────────────────────────────────

/// Blocking `reqwest` client over rustls.
#[derive(Debug, Default)]
pub struct ReqwestStack;

impl ReqwestStack {
    pub fn new() -> Self {
        Self
    }
}

impl NetworkStack for ReqwestStack {
    fn init(&mut self, options: &FetchOptions) -> Result<Box<dyn HttpSession>, DownloadError> {
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(options.scratch_size).map_err(|e| DownloadError::NetworkInit {
            reason: format!("scratch region of {} bytes: {}", options.scratch_size, e),
        })?;
        scratch.resize(options.receive_chunk.clamp(1, options.scratch_size.max(1)), 0);

        if options.insecure_tls {
            warn!("TLS peer verification is DISABLED for this download");
        }

        let mut builder = Client::builder()
            .user_agent(options.user_agent.clone())
            .redirect(redirect::Policy::limited(options.max_redirects as usize))
            .danger_accept_invalid_certs(options.insecure_tls);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| DownloadError::NetworkInit { reason: e.to_string() })?;

        debug!("Network up ({} byte scratch)", options.scratch_size);
        Ok(Box::new(ReqwestSession { client, scratch, max_redirects: options.max_redirects }))
    }
}

struct ReqwestSession {
    client: Client,
    scratch: Vec<u8>,
    max_redirects: u32,
}

impl HttpSession for ReqwestSession {
    fn get(&mut self, url: &str, write: &mut dyn FnMut(&[u8]) -> usize) -> Result<(), TransferError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| classify(e, self.max_redirects))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }
        debug!("GET {} → {} ({:?})", url, status, response.version());

        let mut total = 0usize;
        loop {
            let n = response.read(&mut self.scratch)?;
            if n == 0 {
                break;
            }
            let accepted = write(&self.scratch[..n]);
            if accepted < n {
                return Err(TransferError::WriteAborted { accepted: total + accepted });
            }
            total += n;
        }
        Ok(())
    }
}

impl Drop for ReqwestSession {
    fn drop(&mut self) {
        debug!("Network down");
    }
}

/// Map a `reqwest` failure onto the transfer taxonomy.
fn classify(err: reqwest::Error, max_redirects: u32) -> TransferError {
    if err.is_redirect() {
        return TransferError::Redirects(max_redirects);
    }
    if let Some(status) = err.status() {
        return TransferError::Status(status.as_u16());
    }
    if err.is_connect() {
        let chain = error_chain(&err);
        let lower = chain.to_ascii_lowercase();
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            return TransferError::Tls(chain);
        }
        return TransferError::Connect(chain);
    }
    TransferError::Other(error_chain(&err))
}

fn error_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
