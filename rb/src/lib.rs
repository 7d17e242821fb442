//! reqburst - rate-limited HTTP request bursts
//!
//! A JSON config names request templates, bursts (a rate plus a duration)
//! and the order to run them in. Each step fires its request at the burst's
//! rate through an [`execs::Executor`], every response lands in a single
//! [`Aggregator`], and the run ends with a [`Summary`] of statuses, errors
//! and latency.
//!
//! # Modules
//!
//! - [`config`] - Configuration types and loading
//! - [`plan`] - Resolving a config into an ordered run sequence
//! - [`client`] - HTTP request construction and timing
//! - [`aggregator`] - Result collection actor
//! - [`summary`] - Statistics and rendering
//! - [`runner`] - Driving a plan through executors
//! - [`progress`] - Per-step progress bars
//! - [`cli`] - Command-line interface

pub mod aggregator;
pub mod cli;
pub mod client;
pub mod config;
pub mod plan;
pub mod progress;
pub mod runner;
pub mod summary;

pub use aggregator::{Aggregator, Record};
pub use client::{HttpClient, Outcome, RequestError};
pub use config::{BurstSpec, ConfigFile, ConfigShape, RequestTemplate, Settings};
pub use plan::{Burst, Plan, PlannedRun, PlannedStep, Rate, StepAction, StepRef};
pub use runner::{RunOptions, RunReport, Runner};
pub use summary::{LatencyStats, StepSummary, Summary};
