use std::sync::{Mutex, MutexGuard};

/// Take the lock even if a handler panicked while holding it.
///
/// Handlers and timer callbacks are failure-isolated, so a poisoned mutex only
/// means one of them unwound mid-update; the display controller keeps running
/// on whatever state was left behind.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(context, "mutex poisoned; recovering");
            crate::log_debug(&format!("Mutex poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}
