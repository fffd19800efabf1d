//! RAII guard for single-flight execution.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a busy flag for as long as it lives.
///
/// Acquisition never waits: if the flag is already set, `try_acquire`
/// returns `None` and the caller skips its work. The flag clears on drop,
/// including when the holder panics or its future is dropped.
#[derive(Debug)]
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
