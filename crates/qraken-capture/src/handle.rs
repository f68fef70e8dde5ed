//! Device-side handle accounting.
//!
//! Every event or receive registration a device hands out is a [`Handle`].
//! Dropping the handle closes it, so each handle closes exactly once. The
//! [`HandleLedger`] counts opens and closes for the device that issued them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

#[derive(Debug, Default)]
struct Counts {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct HandleLedger {
    counts: Arc<Counts>,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new open handle.
    pub fn open(&self, kind: &'static str) -> Handle {
        self.counts.opened.fetch_add(1, Ordering::AcqRel);
        trace!("handle open: {}", kind);
        Handle { counts: Arc::clone(&self.counts), kind }
    }

    pub fn opened(&self) -> usize {
        self.counts.opened.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> usize {
        self.counts.closed.load(Ordering::Acquire)
    }

    /// Handles issued and not yet closed.
    pub fn outstanding(&self) -> usize {
        // Every close follows its open, so reading closes first never overcounts them.
        let closed = self.closed();
        self.opened().saturating_sub(closed)
    }
}

/// An open device handle. Closed on drop.
#[derive(Debug)]
pub struct Handle {
    counts: Arc<Counts>,
    kind: &'static str,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.counts.closed.fetch_add(1, Ordering::AcqRel);
        trace!("handle close: {}", self.kind);
    }
}
