//! Per-save transaction id, cooperative cancellation, and progress counters
//! (spec §4.5).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A cheap, cloneable handle to one save's cancellation flag. Created
/// before a `saveNamespace` call starts so the caller retains a handle it
/// can call `cancel()` on from another thread while the engine's `&mut
/// self` is busy running the save (spec §5 `cancelSaveNamespace(reason)`).
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    reason: Arc<parking_lot::Mutex<Option<String>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Set by `cancelSaveNamespace(reason)` (spec §5). Safe to call from any
    /// thread; writers observe it at the checkpoints named in §4.5.
    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Carried through one `saveNamespace` call and shared with the scoped
/// image-writer threads (spec §5: writers poll cancellation cooperatively).
#[derive(Debug)]
pub struct SaveContext {
    image_tx_id: u64,
    token: CancelToken,
    inodes_total: AtomicU64,
    inodes_processed: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveContextError {
    /// Distinguishable from I/O errors so callers never mistake a
    /// cooperative cancellation for a storage failure (spec §5).
    #[error("save cancelled: {0}")]
    Cancelled(String),
}

impl SaveContext {
    pub fn new(image_tx_id: u64) -> Arc<Self> {
        Self::with_token(image_tx_id, CancelToken::new())
    }

    /// Build a context around a token the caller already holds a clone of,
    /// so cancellation can be requested before the writer threads even
    /// start (spec §8 scenario 6).
    pub fn with_token(image_tx_id: u64, token: CancelToken) -> Arc<Self> {
        Arc::new(SaveContext {
            image_tx_id,
            token,
            inodes_total: AtomicU64::new(0),
            inodes_processed: AtomicU64::new(0),
        })
    }

    pub fn image_tx_id(&self) -> u64 {
        self.image_tx_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Set by `cancelSaveNamespace(reason)` (spec §5). Safe to call from any
    /// thread; writers observe it at the checkpoints named in §4.5.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Polled at directory boundaries, at directory-children emission, and
    /// before recursing into each sub-directory (spec §4.5). Returns a
    /// cancellation error distinguishable from I/O errors by callers.
    pub fn check_cancelled(&self) -> Result<(), SaveContextError> {
        if self.is_cancelled() {
            let reason = self.token.reason().unwrap_or_else(|| "cancelled".to_string());
            Err(SaveContextError::Cancelled(reason))
        } else {
            Ok(())
        }
    }

    pub fn set_inodes_total(&self, total: u64) {
        self.inodes_total.store(total, Ordering::Relaxed);
    }

    pub fn inc_inodes_processed(&self, by: u64) {
        self.inodes_processed.fetch_add(by, Ordering::Relaxed);
    }

    pub fn progress(&self) -> (u64, u64) {
        (
            self.inodes_processed.load(Ordering::Relaxed),
            self.inodes_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_cancelled() {
        let ctx = SaveContext::new(7);
        assert_eq!(ctx.image_tx_id(), 7);
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn cancel_is_observed_with_reason() {
        let ctx = SaveContext::new(1);
        ctx.cancel("test");
        let err = ctx.check_cancelled().unwrap_err();
        assert!(matches!(err, SaveContextError::Cancelled(reason) if reason == "test"));
    }

    #[test]
    fn progress_counters_accumulate() {
        let ctx = SaveContext::new(1);
        ctx.set_inodes_total(10);
        ctx.inc_inodes_processed(3);
        ctx.inc_inodes_processed(4);
        assert_eq!(ctx.progress(), (7, 10));
    }

    #[test]
    fn token_created_before_context_can_cancel_it() {
        let token = CancelToken::new();
        let ctx = SaveContext::with_token(1, token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel("operator requested");
        let err = ctx.check_cancelled().unwrap_err();
        assert!(matches!(err, SaveContextError::Cancelled(reason) if reason == "operator requested"));
    }

    #[test]
    fn cancellation_visible_across_threads() {
        let ctx = SaveContext::new(1);
        let ctx2 = Arc::clone(&ctx);
        let handle = std::thread::spawn(move || {
            while ctx2.check_cancelled().is_ok() {
                std::thread::yield_now();
            }
        });
        ctx.cancel("stop");
        handle.join().unwrap();
    }
}
