//! Small cross-thread coordination primitives shared by the session worker
//! and the global service.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One-shot completion flag a dedicated worker thread sets when it exits
/// cleanly, and that callers can block on (with a timeout) during
/// shutdown.
///
/// Forced cancellation races graceful completion by clearing whatever
/// callback was registered *before* signalling cancellation, so the
/// worker's cleanup path reads "no callback" under happens-before — see
/// [`crate::session::DataSession::stop`].
pub struct CompletionSignal {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Mark the signal as complete and wake any waiters.
    pub fn complete(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.condvar.notify_all();
    }

    /// Block until `complete()` has been called, or until `timeout`
    /// elapses. Returns whether completion was observed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap();
        if *done {
            return true;
        }
        let (done, result) = self
            .condvar
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap();
        drop(done);
        !result.timed_out()
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_true_once_completed() {
        let signal = Arc::new(CompletionSignal::new());
        let worker = signal.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.complete();
        });
        assert!(signal.wait(Duration::from_secs(1)));
    }

    #[test]
    fn wait_times_out_if_never_completed() {
        let signal = CompletionSignal::new();
        assert!(!signal.wait(Duration::from_millis(20)));
    }
}
