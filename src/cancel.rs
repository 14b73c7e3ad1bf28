//! Cooperative cancellation shared by every background task.
//!
//! A single token is cloned into the flush/state coroutines, the capture
//! threads, the dashboard loop, and the signal handler. Tasks re-check the
//! token on every bounded blocking suspension (timer ticks, pcap read
//! timeouts, terminal event polls), so one `cancel()` drains the whole
//! process within a tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clonable one-shot cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        // Idempotent.
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
