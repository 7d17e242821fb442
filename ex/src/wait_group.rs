//! WaitGroup - join counter for spawned invocations
//!
//! Every spawned invocation holds a [`WaitGuard`]. Dropping the guard
//! decrements the counter, including while unwinding from a panic, so a
//! panicking invocation can never leave `wait()` hanging.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    panicked: AtomicUsize,
    notify: Notify,
}

/// Counts outstanding invocations and wakes waiters when the count reaches zero
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

/// Held by one outstanding invocation; decrements the group on drop
#[derive(Debug)]
#[must_use = "the invocation is only counted while the guard is alive"]
pub struct WaitGuard {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one outstanding invocation
    pub fn add(&self) -> WaitGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        WaitGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of guards still alive
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Number of guards dropped while their task was panicking
    pub fn panicked(&self) -> usize {
        self.inner.panicked.load(Ordering::Acquire)
    }

    /// Wait until every guard has been dropped
    ///
    /// Returns immediately when nothing is outstanding. Callers must make sure
    /// no new guards are being added, otherwise this may return while work is
    /// still being registered.
    pub async fn wait(&self) {
        debug!(count = self.count(), "WaitGroup::wait: called");
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the count so a concurrent final drop
            // cannot slip between the check and the await.
            notified.as_mut().enable();

            if self.count() == 0 {
                debug!("WaitGroup::wait: drained");
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.inner.panicked.fetch_add(1, Ordering::AcqRel);
        }
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
