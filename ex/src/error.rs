//! Error types for the executor and the rate loop

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::Executor`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// Intake is closed: `kill` has begun or the dispatcher is gone
    #[error("executor intake is closed")]
    Closed,

    #[error("invalid executor config: {0}")]
    InvalidConfig(String),
}

/// Errors returned when building a [`crate::Repeat`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepeatError {
    #[error("repeat interval must be greater than zero")]
    ZeroInterval,

    #[error("repeat interval {0:?} is too large")]
    IntervalTooLarge(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_display() {
        assert_eq!(ExecutorError::Closed.to_string(), "executor intake is closed");
        let err = ExecutorError::InvalidConfig("max_in_flight must be > 0".to_string());
        assert!(err.to_string().contains("max_in_flight"));
    }

    #[test]
    fn test_repeat_error_display() {
        assert!(RepeatError::ZeroInterval.to_string().contains("greater than zero"));
    }
}
