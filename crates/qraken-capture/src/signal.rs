//! Wait-any signal set for the capture thread.
//!
//! One [`WaitSet`] owns three slots: cancel, frame-ready and buffer-error.
//! Anyone holding a [`Signal`] for a slot can raise it; the capture thread
//! blocks in [`WaitSet::wait_any`] until at least one is raised. Cancel is
//! sticky (manual reset) and always wins when raised together with others.
//! Frame-ready and buffer-error clear when they are returned.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A slot in the capture thread's wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitSlot {
    Cancel,
    FrameReady,
    BufferError,
}

impl WaitSlot {
    /// Checked in this order; the first raised slot is returned.
    const PRIORITY: [WaitSlot; 3] = [WaitSlot::Cancel, WaitSlot::FrameReady, WaitSlot::BufferError];

    fn bit(self) -> u8 {
        match self {
            Self::Cancel => 1 << 0,
            Self::FrameReady => 1 << 1,
            Self::BufferError => 1 << 2,
        }
    }

    fn sticky(self) -> bool {
        matches!(self, Self::Cancel)
    }
}

struct Shared {
    raised: Mutex<u8>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, u8> {
        self.raised.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone)]
pub struct WaitSet {
    shared: Arc<Shared>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared { raised: Mutex::new(0), cond: Condvar::new() }),
        }
    }

    /// A raisable handle to `slot`.
    pub fn signal(&self, slot: WaitSlot) -> Signal {
        Signal { shared: Arc::clone(&self.shared), slot }
    }

    /// Cancellation handle for this set.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.signal(WaitSlot::Cancel))
    }

    /// Block until a slot is raised and return it.
    pub fn wait_any(&self) -> WaitSlot {
        let mut raised = self.shared.lock();
        loop {
            if let Some(slot) = Self::take(&mut raised) {
                return slot;
            }
            raised = self.shared.cond.wait(raised).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Like [`wait_any`](Self::wait_any), giving up after `timeout`.
    pub fn wait_any_timeout(&self, timeout: Duration) -> Option<WaitSlot> {
        let deadline = Instant::now() + timeout;
        let mut raised = self.shared.lock();
        loop {
            if let Some(slot) = Self::take(&mut raised) {
                return Some(slot);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            raised = self
                .shared
                .cond
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    fn take(raised: &mut u8) -> Option<WaitSlot> {
        let slot = WaitSlot::PRIORITY.into_iter().find(|s| *raised & s.bit() != 0)?;
        if !slot.sticky() {
            *raised &= !slot.bit();
        }
        Some(slot)
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Raises one slot of a [`WaitSet`].
#[derive(Clone)]
pub struct Signal {
    shared: Arc<Shared>,
    slot: WaitSlot,
}

impl Signal {
    pub fn raise(&self) {
        let mut raised = self.shared.lock();
        *raised |= self.slot.bit();
        self.shared.cond.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.shared.lock() & self.slot.bit() != 0
    }

    pub fn slot(&self) -> WaitSlot {
        self.slot
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("slot", &self.slot).finish()
    }
}

/// Sticky cancel request for a capture session.
#[derive(Clone, Debug)]
pub struct CancelToken(Signal);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.raise();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_raised()
    }
}
