//! Summary - status histogram, error tally and latency stats over a run

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use eyre::Result;
use serde::Serialize;
use tracing::debug;

use crate::aggregator::Record;
use crate::cli::OutputFormat;

/// Latency over a set of outcomes, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

impl LatencyStats {
    fn from_durations(durations: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let mut count: u32 = 0;
        let mut total = Duration::ZERO;
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        for d in durations {
            count += 1;
            total += d;
            min = min.min(d);
            max = max.max(d);
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            min_ms: as_ms(min),
            max_ms: as_ms(max),
            avg_ms: as_ms(total / count),
        })
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Per step breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub label: String,
    pub request_id: String,
    pub burst_id: String,
    pub total: u64,
    pub errors: u64,
    pub avg_ms: f64,
}

/// Everything printed at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Every request, failed or not
    pub total: u64,
    /// Requests that failed, including responses whose body was cut short
    pub errors: u64,
    /// Response count by status code; failed requests are not counted here
    pub statuses: BTreeMap<u16, u64>,
    /// Latency over every request, failed ones included
    pub latency: Option<LatencyStats>,
    /// Per step, in order of first result
    pub steps: Vec<StepSummary>,
    /// Distinct error messages and how often each occurred
    pub error_messages: BTreeMap<String, u64>,
    /// Steps that were marked as skipped
    pub skipped: Vec<String>,
}

impl Summary {
    pub fn from_records(records: &[Record]) -> Self {
        debug!(count = records.len(), "Summary::from_records: called");
        let mut summary = Self {
            total: records.len() as u64,
            latency: LatencyStats::from_durations(records.iter().map(|r| r.outcome.elapsed)),
            ..Default::default()
        };

        let mut step_elapsed: Vec<Duration> = Vec::new();
        for record in records {
            match (&record.outcome.status, &record.outcome.error) {
                (Some(status), None) => *summary.statuses.entry(*status).or_default() += 1,
                (_, error) => {
                    summary.errors += 1;
                    let message = error.clone().unwrap_or_else(|| "unknown error".to_string());
                    *summary.error_messages.entry(message).or_default() += 1;
                }
            }

            let position = summary.steps.iter().position(|s| {
                s.label == record.label && s.request_id == record.request_id && s.burst_id == record.burst_id
            });
            let index = match position {
                Some(index) => index,
                None => {
                    summary.steps.push(StepSummary {
                        label: record.label.clone(),
                        request_id: record.request_id.clone(),
                        burst_id: record.burst_id.clone(),
                        total: 0,
                        errors: 0,
                        avg_ms: 0.0,
                    });
                    step_elapsed.push(Duration::ZERO);
                    summary.steps.len() - 1
                }
            };
            let step = &mut summary.steps[index];
            step.total += 1;
            if record.outcome.is_error() {
                step.errors += 1;
            }
            step_elapsed[index] += record.outcome.elapsed;
        }

        for (step, elapsed) in summary.steps.iter_mut().zip(step_elapsed) {
            step.avg_ms = as_ms(elapsed) / step.total as f64;
        }

        summary
    }

    pub fn with_skipped(mut self, skipped: Vec<String>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Render for stdout
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        debug!(%format, "Summary::render: called");
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => Ok(self.render_text()),
            OutputFormat::Table => {
                let mut out = self.render_text();
                out.push('\n');
                out.push_str(&self.render_steps());
                Ok(out)
            }
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Total requests: {}", self.total);
        let _ = writeln!(out, "Total errors: {}", self.errors);
        match &self.latency {
            Some(latency) => {
                let _ = writeln!(out, "Average response time: {:.3} ms", latency.avg_ms);
                let _ = writeln!(out, "Min response time: {:.3} ms", latency.min_ms);
                let _ = writeln!(out, "Max response time: {:.3} ms", latency.max_ms);
            }
            None => {
                let _ = writeln!(out, "Average response time: n/a");
            }
        }

        if !self.statuses.is_empty() {
            let mut status_row = vec!["status:".to_string()];
            let mut quantity_row = vec!["quantity:".to_string()];
            for (status, n) in &self.statuses {
                status_row.push(status.to_string());
                quantity_row.push(n.to_string());
            }
            out.push_str(&align_columns(&[status_row, quantity_row], 1));
        }

        if !self.error_messages.is_empty() {
            let _ = writeln!(out, "Errors:");
            for (message, n) in &self.error_messages {
                let _ = writeln!(out, "  {} x {}", n, message);
            }
        }

        if !self.skipped.is_empty() {
            let _ = writeln!(out, "Skipped steps: {}", self.skipped.join(", "));
        }
        out
    }

    fn render_steps(&self) -> String {
        let mut rows = vec![vec![
            "LABEL".to_string(),
            "REQUEST".to_string(),
            "BURST".to_string(),
            "TOTAL".to_string(),
            "ERRORS".to_string(),
            "AVG(ms)".to_string(),
        ]];
        for step in &self.steps {
            rows.push(vec![
                step.label.clone(),
                step.request_id.clone(),
                step.burst_id.clone(),
                step.total.to_string(),
                step.errors.to_string(),
                format!("{:.3}", step.avg_ms),
            ]);
        }
        align_columns(&rows, 2)
    }
}

/// Left-align cells into columns separated by at least `padding` spaces
fn align_columns(rows: &[Vec<String>], padding: usize) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| rows.iter().filter_map(|row| row.get(c)).map(String::len).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(c, cell)| format!("{:<width$}", cell, width = widths[c] + padding))
            .collect();
        let _ = writeln!(out, "{}", line.concat().trim_end());
    }
    out
}
