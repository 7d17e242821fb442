//! Progress bars for running steps

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

const STEP_TEMPLATE: &str = "   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}";

/// Hands out one bar per step, or hidden bars when disabled
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    enabled: bool,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Bar sized to the fires a step should produce
    pub fn step_bar(&self, expected: u64, message: String) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(expected);
        match ProgressStyle::default_bar().template(STEP_TEMPLATE) {
            Ok(style) => pb.set_style(style.progress_chars("=>-")),
            Err(e) => warn!(error = %e, "Progress::step_bar: bad template, using default style"),
        }
        pb.set_message(message);
        pb
    }
}
