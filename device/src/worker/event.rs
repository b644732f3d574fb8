//! Manual-reset completion event.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A manual-reset event a worker signals when it reaches a
/// [`Command::Sync`](crate::Command::Sync).
///
/// Once signaled the event stays signaled (every waiter returns immediately)
/// until [`reset`](Self::reset) is called.
#[derive(Debug, Default)]
pub struct CompletionEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    /// Block until signaled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    /// Block until signaled or `timeout` elapses; returns whether it was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self
                .cond
                .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
        }
        *signaled
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}
