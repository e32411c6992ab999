//! A callback that runs at most once.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type Callback<T> = Box<dyn FnOnce(T) + Send>;

/// Guards a callback behind an explicit fired flag.
///
/// The first [`CallOnce::call`] runs the callback; every later call is a
/// no-op and reports `false`.
pub struct CallOnce<T> {
    fired: AtomicBool,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T> CallOnce<T> {
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            fired: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Run the callback with `value` unless it already ran.
    pub fn call(&self, value: T) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callback = self.callback.lock().take();
        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl<T> std::fmt::Debug for CallOnce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOnce")
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let once = CallOnce::new(move |n: usize| {
            seen.fetch_add(n, Ordering::SeqCst);
        });

        assert!(!once.has_fired());
        assert!(once.call(5));
        assert!(!once.call(7));
        assert!(once.has_fired());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_reentrant_call_is_noop() {
        let once: Arc<CallOnce<u8>> = Arc::new(CallOnce::new(|_| {}));
        let inner = once.clone();
        let outer = CallOnce::new(move |v: u8| {
            inner.call(v);
            assert!(!inner.call(v));
        });

        assert!(outer.call(1));
        assert!(once.has_fired());
    }
}
