//! execs - concurrent fire/kill executor and rate-limited timed loops
//!
//! Two primitives live here:
//!
//! - [`Executor`] decouples producing work items from running an async
//!   `action` on each of them and then an async `handle` on each result.
//!   Both stages fan out one tokio task per item. [`Executor::kill`] closes
//!   intake and drains both stages before returning.
//! - [`repeat`] and [`timed_loop`] drive a callback at a fixed period for a
//!   bounded wall-clock duration, with cooperative cancellation at tick
//!   boundaries.
//!
//! # Modules
//!
//! - [`executor`] - fire/kill pipeline and its configuration
//! - [`wait_group`] - atomic join counter used by the drain
//! - [`repeat`] - fixed-period loop with invocation counter
//! - [`timed_loop`] - wall-clock bound plus rendezvous cancellation
//! - [`error`] - error types

pub mod error;
pub mod executor;
pub mod repeat;
pub mod timed_loop;
pub mod wait_group;

pub use error::{ExecutorError, RepeatError};
pub use executor::{DrainReport, Executor, ExecutorConfig, ExecutorState, Intake};
pub use repeat::{Repeat, repeat};
pub use timed_loop::{CancelAck, CancelSignal, Canceller, cancel_channel, timed_loop};
pub use wait_group::{WaitGroup, WaitGuard};
