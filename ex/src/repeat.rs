//! Repeat - invoke a callback on a fixed period until cancelled

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::RepeatError;
use crate::timed_loop::CancelSignal;

/// Intervals above this are treated as a config mistake
const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// A fixed-period loop around `action`
///
/// Built by [`repeat`]; [`Repeat::run`] is the loop body handed to
/// [`crate::timed_loop`].
#[derive(Debug)]
pub struct Repeat<F> {
    action: F,
    interval: Duration,
}

/// Build a loop that calls `action(i)` once per `interval`, with `i`
/// counting from 0
pub fn repeat<F, Fut>(action: F, interval: Duration) -> Result<Repeat<F>, RepeatError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
{
    if interval.is_zero() {
        return Err(RepeatError::ZeroInterval);
    }
    if interval > MAX_INTERVAL {
        return Err(RepeatError::IntervalTooLarge(interval));
    }
    Ok(Repeat { action, interval })
}

impl<F, Fut> Repeat<F>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
{
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `cancel` fires; returns the number of invocations
    ///
    /// The first invocation happens one interval after the call. Each
    /// invocation is awaited before the next tick is considered. If ticks
    /// were missed while it ran, exactly one fires straight away and the rest
    /// are dropped, so a slow action runs back to back but never in a burst.
    /// When a tick and the cancellation are both ready, cancellation wins.
    pub async fn run(mut self, mut cancel: CancelSignal) -> u64 {
        debug!(interval = ?self.interval, "Repeat::run: called");
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut i: u64 = 0;
        loop {
            tokio::select! {
                biased;
                ack = cancel.recv() => {
                    debug!(invocations = i, "Repeat::run: cancelled");
                    drop(ack);
                    return i;
                }
                _ = ticker.tick() => {
                    (self.action)(i).await;
                    i += 1;
                }
            }
        }
    }
}
