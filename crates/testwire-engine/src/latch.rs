//! One-shot signal that threads can block on.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A flag that flips once and wakes every waiter.
#[derive(Debug, Default)]
pub struct Latch {
    fired: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    /// Fires the latch. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let mut fired = self.lock();
        if *fired {
            return false;
        }
        *fired = true;
        self.signal.notify_all();
        true
    }

    /// Returns `true` once the latch has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Blocks until the latch fires.
    pub fn wait(&self) {
        let mut fired = self.lock();
        while !*fired {
            fired = self
                .signal
                .wait(fired)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the latch fires or `timeout` elapses. Returns whether it
    /// fired.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let fired = self.lock();
        let (fired, _) = self
            .signal
            .wait_timeout_while(fired, timeout, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
        *fired
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn only_the_first_trigger_reports_firing() {
        let latch = Latch::default();
        assert!(latch.trigger());
        assert!(!latch.trigger());
        assert!(latch.is_triggered());
    }

    #[test]
    fn wakes_waiters_on_other_threads() {
        let latch = Arc::new(Latch::default());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        latch.trigger();
        waiter.join().expect("waiter thread");
    }

    #[test]
    fn wait_timeout_reports_unfired_latch() {
        let latch = Latch::default();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }
}
