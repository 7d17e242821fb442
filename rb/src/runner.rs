//! Runner - drive a resolved plan through executors and timed loops
//!
//! Each burst id gets one executor, created the first time a step uses it
//! and shared by every later step with the same burst. Steps run one after
//! another; within a step, a [`repeat`] loop fires the step's request at
//! the burst's rate until [`timed_loop`] cancels it. Executors are only
//! killed once every step has run, so requests still in flight from an
//! earlier step keep going while the next step fires.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{Context, Result};
use execs::{DrainReport, Executor, ExecutorConfig, Intake, repeat, timed_loop};
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, Record};
use crate::client::HttpClient;
use crate::config::{RequestTemplate, Settings};
use crate::plan::{Burst, Plan, StepAction};
use crate::progress::Progress;
use crate::summary::Summary;

/// One unit of work fired into an executor
#[derive(Debug, Clone)]
pub struct Job {
    pub label: Arc<str>,
    pub request_id: Arc<str>,
    pub burst_id: Arc<str>,
    pub request: Arc<RequestTemplate>,
}

/// Knobs that come from the command line rather than the config
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `settings.max-in-flight` when set
    pub max_in_flight: Option<usize>,
    /// Draw a progress bar per step
    pub progress: bool,
}

/// How one step went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRun {
    pub label: String,
    pub step: String,
    pub fires: u64,
    pub expected: u64,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Every collected result, in arrival order
    pub records: Vec<Record>,
    /// Drain report per burst id
    pub drains: BTreeMap<String, DrainReport>,
    /// Steps that ran, in order
    pub steps: Vec<StepRun>,
    /// Raw text of skipped steps, in plan order
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        Summary::from_records(&self.records).with_skipped(self.skipped.clone())
    }

    /// Total fires over all steps
    pub fn fires(&self) -> u64 {
        self.steps.iter().map(|s| s.fires).sum()
    }
}

type StepExecutor = Executor<Job, Record>;

pub struct Runner {
    plan: Plan,
    settings: Settings,
    options: RunOptions,
    client: HttpClient,
    progress: Progress,
}

impl Runner {
    pub fn new(plan: Plan, settings: Settings, options: RunOptions) -> Result<Self> {
        debug!(?options, "Runner::new: called");
        let client = HttpClient::new(&settings)?;
        let progress = Progress::new(options.progress);
        Ok(Self {
            plan,
            settings,
            options,
            client,
            progress,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Run every step in order, then drain every executor
    pub async fn run(&self) -> Result<RunReport> {
        info!(
            runs = self.plan.runs.len(),
            active_steps = self.plan.active_steps(),
            expected_fires = self.plan.expected_fires(),
            "Runner::run: starting"
        );
        let started = Instant::now();
        let aggregator = Aggregator::spawn();
        let mut executors: BTreeMap<String, Arc<StepExecutor>> = BTreeMap::new();
        let mut report = RunReport::default();

        for run in &self.plan.runs {
            info!(label = %run.label, execution = %run.execution_id, "Runner::run: execution started");
            for step in &run.steps {
                let (request, burst) = match &step.action {
                    StepAction::Skip => {
                        info!(label = %run.label, step = %step.step.raw, "Runner::run: step skipped");
                        report.skipped.push(step.step.raw.clone());
                        continue;
                    }
                    StepAction::Fire { request, burst } => (request, *burst),
                };

                let executor = match executors.entry(step.step.burst_id.clone()) {
                    Entry::Occupied(entry) => Arc::clone(entry.get()),
                    Entry::Vacant(entry) => {
                        debug!(burst_id = %step.step.burst_id, "Runner::run: creating executor");
                        Arc::clone(entry.insert(Arc::new(self.executor(&aggregator)?)))
                    }
                };

                let job = Job {
                    label: Arc::from(run.label.as_str()),
                    request_id: Arc::from(step.step.request_id.as_str()),
                    burst_id: Arc::from(step.step.burst_id.as_str()),
                    request: Arc::clone(request),
                };
                let fires = self.run_step(executor, job, burst).await?;
                info!(label = %run.label, step = %step.step.raw, fires, "Runner::run: step finished");
                report.steps.push(StepRun {
                    label: run.label.clone(),
                    step: step.step.raw.clone(),
                    fires,
                    expected: burst.expected_fires(),
                });
            }
        }

        for (burst_id, executor) in &executors {
            let drain = executor.kill().await;
            if !drain.is_clean() {
                warn!(%burst_id, ?drain, "Runner::run: executor did not drain cleanly");
            }
            report.drains.insert(burst_id.clone(), drain);
        }

        report.records = aggregator.finish().await.context("Failed to collect results")?;
        report.elapsed = started.elapsed();
        info!(
            records = report.records.len(),
            fires = report.fires(),
            elapsed = ?report.elapsed,
            "Runner::run: finished"
        );
        Ok(report)
    }

    fn executor(&self, aggregator: &Aggregator) -> Result<StepExecutor> {
        let config = ExecutorConfig {
            intake: Intake::Rendezvous,
            max_in_flight: self.options.max_in_flight.or(self.settings.max_in_flight),
            result_buffer: self.settings.result_buffer,
        };
        let client = self.client.clone();
        let aggregator = aggregator.clone();

        Executor::with_config(
            config,
            move |job: Job| {
                let client = client.clone();
                async move {
                    let outcome = client.execute(&job.request).await;
                    Record {
                        label: job.label.to_string(),
                        request_id: job.request_id.to_string(),
                        burst_id: job.burst_id.to_string(),
                        outcome,
                    }
                }
            },
            move |record: Record| {
                let aggregator = aggregator.clone();
                async move {
                    if let Err(e) = aggregator.record(record).await {
                        warn!(error = %e, "Runner: result dropped");
                    }
                }
            },
        )
        .context("Failed to create executor")
    }

    /// Fire `job` at the burst's rate for the burst's duration
    async fn run_step(&self, executor: Arc<StepExecutor>, job: Job, burst: Burst) -> Result<u64> {
        debug!(request_id = %job.request_id, burst_id = %job.burst_id, ?burst, "Runner::run_step: called");
        let pb = self.progress.step_bar(
            burst.expected_fires(),
            format!("{} {}/{}", job.label, job.request_id, job.burst_id),
        );

        let bar = pb.clone();
        let looped = repeat(
            move |tick| {
                let executor = Arc::clone(&executor);
                let job = job.clone();
                let bar = bar.clone();
                async move {
                    match executor.fire(job).await {
                        Ok(()) => bar.inc(1),
                        Err(e) => warn!(tick, error = %e, "Runner::run_step: fire rejected"),
                    }
                }
            },
            burst.interval(),
        )
        .context("Invalid burst rate")?;

        let handle = timed_loop(move |cancel| looped.run(cancel), burst.duration).await;
        let fires = handle.await.context("Step loop task failed")?;
        pb.finish_and_clear();
        Ok(fires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn runner(json: &str, options: RunOptions) -> Runner {
        let config = ConfigFile::from_json(json).unwrap();
        let plan = Plan::resolve(&config).unwrap();
        Runner::new(plan, config.settings, options).unwrap()
    }

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_empty_plan() {
        let report = runner(r#"{"steps": []}"#, RunOptions::default()).run().await.unwrap();
        assert!(report.records.is_empty());
        assert!(report.drains.is_empty());
        assert_eq!(report.summary().total, 0);
    }

    #[tokio::test]
    async fn test_skipped_steps_are_reported() {
        let report = runner(
            r##"{
                "req_burst": {},
                "executions": {"one": ["#a/b", "~c/d"]},
                "steps": ["l", "one"]
            }"##,
            RunOptions::default(),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(report.skipped, vec!["#a/b", "~c/d"]);
        assert!(report.steps.is_empty());
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_collected_as_errors() {
        let url = closed_port_url().await;
        let json = format!(
            r##"{{
                "reqs": {{"down": {{"url": "{url}"}}}},
                "executions": {{"fast": {{"rps": 20, "duration": 1}}}},
                "steps": ["down/fast"]
            }}"##
        );
        let report = runner(&json, RunOptions::default()).run().await.unwrap();

        let fires = report.fires();
        assert!(fires.abs_diff(20) <= 2, "expected ~20 fires, got {fires}");
        assert_eq!(report.records.len() as u64, fires);
        let drain = &report.drains["fast"];
        assert!(drain.is_clean());
        assert_eq!(drain.fired, fires);

        let summary = report.summary();
        assert_eq!(summary.errors, fires);
        assert!(summary.statuses.is_empty());
    }

    #[tokio::test]
    async fn test_executor_shared_per_burst() {
        let url = closed_port_url().await;
        let json = format!(
            r##"{{
                "reqs": {{"a": {{"url": "{url}a"}}, "b": {{"url": "{url}b"}}}},
                "req_burst": {{"quick": {{"rps": 10, "duration": 1}}}},
                "executions": {{"both": ["a/quick", "b/quick"]}},
                "steps": ["first", "both"]
            }}"##
        );
        let report = runner(
            &json,
            RunOptions {
                max_in_flight: Some(2),
                progress: false,
            },
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.drains.len(), 1);
        assert_eq!(report.drains["quick"].fired, report.fires());
        let summary = report.summary();
        assert_eq!(summary.steps.len(), 2);
    }
}
