//! First-success warmup gate

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether the initial cache warmup has completed once in this
/// process.
///
/// Constructed once per process and shared via `Arc`; never a global.
/// The flag only ever transitions false → true, and the transition is a
/// compare-and-set so racing callers cannot both win.
#[derive(Debug, Default)]
pub struct WarmupCoordinator {
    warmed_up: AtomicBool,
}

impl WarmupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the one-time transition. Returns `true` only for the single
    /// call that actually flipped the flag; every other caller, concurrent
    /// or later, gets `false` and must not re-trigger the one-time side
    /// effect.
    pub fn mark_as_warmed_up(&self) -> bool {
        self.warmed_up
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up.load(Ordering::Acquire)
    }

    /// Clear the flag. Test isolation only; production code never resets.
    pub fn reset(&self) {
        self.warmed_up.store(false, Ordering::Release);
    }
}
