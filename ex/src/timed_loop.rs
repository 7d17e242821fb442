//! Timed loop - run a cancellable loop for a fixed wall-clock duration
//!
//! Cancellation is a rendezvous: [`Canceller::cancel`] hands the loop an
//! acknowledgement slot and waits until the loop has picked it up.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Create a connected cancellation pair
pub fn cancel_channel() -> (Canceller, CancelSignal) {
    let (tx, rx) = oneshot::channel();
    (Canceller { tx }, CancelSignal { rx })
}

/// Sending half, owned by whoever bounds the loop
#[derive(Debug)]
pub struct Canceller {
    tx: oneshot::Sender<oneshot::Sender<()>>,
}

/// Receiving half, handed to the loop
#[derive(Debug)]
pub struct CancelSignal {
    rx: oneshot::Receiver<oneshot::Sender<()>>,
}

/// Proof that the loop received the signal; acknowledges when dropped
#[derive(Debug)]
pub struct CancelAck {
    ack: Option<oneshot::Sender<()>>,
}

impl Canceller {
    /// Signal the loop and wait until it has received the signal
    ///
    /// Returns immediately if the loop has already gone away.
    pub async fn cancel(self) {
        debug!("Canceller::cancel: called");
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).is_err() {
            debug!("Canceller::cancel: loop already gone");
            return;
        }
        let _ = ack_rx.await;
        debug!("Canceller::cancel: acknowledged");
    }
}

impl CancelSignal {
    /// Wait for cancellation
    ///
    /// Cancel safe: dropping the returned future before it completes leaves
    /// the signal untouched. A dropped [`Canceller`] counts as cancellation.
    /// Must not be polled again after it has returned.
    pub async fn recv(&mut self) -> CancelAck {
        let ack = (&mut self.rx).await.ok();
        CancelAck { ack }
    }
}

impl CancelAck {
    /// Acknowledge now instead of on drop
    pub fn ack(mut self) {
        self.send();
    }

    fn send(&mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}

impl Drop for CancelAck {
    fn drop(&mut self) {
        self.send();
    }
}

/// Spawn `lp` with a fresh cancellation signal, let it run for `duration`,
/// then cancel it
///
/// Returns once the loop has acknowledged cancellation. The loop task may
/// still be finishing; its output is available through the returned handle.
pub async fn timed_loop<L, Fut>(lp: L, duration: Duration) -> JoinHandle<Fut::Output>
where
    L: FnOnce(CancelSignal) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    debug!(?duration, "timed_loop: called");
    let (canceller, signal) = cancel_channel();
    let handle = tokio::spawn(lp(signal));

    tokio::time::sleep(duration).await;
    canceller.cancel().await;

    debug!("timed_loop: loop cancelled");
    handle
}
