//! Shared shutdown flags.
//!
//! Two levels: soft lets in-flight records drain to the last confirmed
//! checkpoint, hard wakes every waiter and exits as soon as threads observe
//! the flag. Components poll these at every suspension point; no wait in
//! the pipeline may sleep without also watching them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative shutdown state shared by every thread of one pipeline
/// instance (and by the signal handler across instances).
#[derive(Debug, Default)]
pub struct Shutdown {
    soft: AtomicBool,
    hard: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Request a drain-and-exit: stop taking new work, flush what is in
    /// flight up to the last confirmed checkpoint.
    pub fn stop_soft(&self) {
        self.soft.store(true, Ordering::Release);
    }

    /// Request an immediate exit. Implies soft.
    pub fn stop_hard(&self) {
        self.soft.store(true, Ordering::Release);
        self.hard.store(true, Ordering::Release);
    }

    #[inline]
    pub fn soft_requested(&self) -> bool {
        self.soft.load(Ordering::Acquire)
    }

    #[inline]
    pub fn hard_requested(&self) -> bool {
        self.hard.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let s = Shutdown::new();
        assert!(!s.soft_requested());
        assert!(!s.hard_requested());
    }

    #[test]
    fn soft_does_not_imply_hard() {
        let s = Shutdown::new();
        s.stop_soft();
        assert!(s.soft_requested());
        assert!(!s.hard_requested());
    }

    #[test]
    fn hard_implies_soft() {
        let s = Shutdown::new();
        s.stop_hard();
        assert!(s.soft_requested());
        assert!(s.hard_requested());
    }
}
