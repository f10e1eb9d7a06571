use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counter that wakes its waiters when it reaches zero.
///
/// Each state uses one to track predecessor actions that have not signalled
/// yet, and the workflow uses one to track states that have not left yet.
/// No lock is involved: increments happen while the graph is being wired,
/// and each decrement comes from exactly one call site per logical event.
#[derive(Debug, Default)]
pub struct Countdown {
    remaining: AtomicUsize,
    zero: Notify,
}

impl Countdown {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            zero: Notify::new(),
        }
    }

    pub fn add(&self, n: usize) {
        self.remaining.fetch_add(n, Ordering::AcqRel);
    }

    /// Decrement by one. Returns `true` if this call reached zero.
    ///
    /// Saturates at zero: an extra call is ignored rather than wrapping.
    pub fn done(&self) -> bool {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                self.zero.notify_waiters();
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Wait until the count reaches zero. Returns immediately if it already has.
    pub async fn wait(&self) {
        loop {
            // Register before checking so a concurrent `done()` cannot slip between.
            let notified = self.zero.notified();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}
