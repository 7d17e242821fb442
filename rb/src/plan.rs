//! Plan - resolve a config into an ordered list of bursts to run
//!
//! Resolution checks every reference up front so that a bad config fails
//! before the first request goes out.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, bail, eyre};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{BurstSpec, ConfigFile, ConfigShape, ExecutionEntry, RequestTemplate};

/// Leading characters that mark a step as skipped
pub const SKIP_MARKERS: [char; 4] = ['#', '!', '-', '~'];

/// Request rate of a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    PerMinute(u32),
    PerSecond(u32),
}

impl Rate {
    /// Time between two fires
    pub fn interval(&self) -> Duration {
        match *self {
            Self::PerMinute(n) => Duration::from_nanos(60_000_000_000 / u64::from(n.max(1))),
            Self::PerSecond(n) => Duration::from_nanos(1_000_000_000 / u64::from(n.max(1))),
        }
    }

    /// Requests per minute
    pub fn per_minute(&self) -> u64 {
        match *self {
            Self::PerMinute(n) => u64::from(n),
            Self::PerSecond(n) => u64::from(n) * 60,
        }
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerMinute(n) => write!(f, "{} rpm", n),
            Self::PerSecond(n) => write!(f, "{} rps", n),
        }
    }
}

/// A validated burst: rate plus duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Burst {
    pub rate: Rate,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

impl Burst {
    pub fn from_spec(id: &str, spec: &BurstSpec) -> Result<Self> {
        debug!(%id, ?spec, "Burst::from_spec: called");
        let rate = match (spec.rpm, spec.rps) {
            (Some(_), Some(_)) => bail!("burst '{}' sets both rpm and rps", id),
            (None, None) => bail!("burst '{}' needs either rpm or rps", id),
            (Some(0), None) | (None, Some(0)) => bail!("burst '{}' has a zero rate", id),
            (Some(rpm), None) => Rate::PerMinute(rpm),
            (None, Some(rps)) => Rate::PerSecond(rps),
        };
        Ok(Self {
            rate,
            duration: Duration::from_secs(spec.duration),
        })
    }

    pub fn interval(&self) -> Duration {
        self.rate.interval()
    }

    /// Fires a burst should produce: rate x duration, rounded
    pub fn expected_fires(&self) -> u64 {
        let per_minute_secs = self.rate.per_minute() * self.duration.as_secs();
        (per_minute_secs + 30) / 60
    }
}

/// `"request-id/burst-id"` with its optional marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRef {
    pub raw: String,
    pub marker: Option<char>,
    pub request_id: String,
    pub burst_id: String,
}

impl StepRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (marker, rest) = match trimmed.chars().next() {
            Some(c) if SKIP_MARKERS.contains(&c) => (Some(c), trimmed[c.len_utf8()..].trim_start()),
            _ => (None, trimmed),
        };

        let (request_id, burst_id) = rest
            .split_once('/')
            .ok_or_else(|| eyre!("step '{}' is not in request-id/burst-id form", raw))?;
        if request_id.is_empty() || burst_id.is_empty() || burst_id.contains('/') {
            bail!("step '{}' is not in request-id/burst-id form", raw);
        }

        Ok(Self {
            raw: raw.to_string(),
            marker,
            request_id: request_id.to_string(),
            burst_id: burst_id.to_string(),
        })
    }

    pub fn is_skipped(&self) -> bool {
        self.marker.is_some()
    }
}

/// What a step does when its turn comes
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Marked step: reported, not run
    Skip,
    /// Fire `request` at `burst`'s rate for `burst`'s duration
    Fire {
        request: Arc<RequestTemplate>,
        burst: Burst,
    },
}

/// One resolved step
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step: StepRef,
    pub action: StepAction,
}

impl PlannedStep {
    pub fn burst(&self) -> Option<&Burst> {
        match &self.action {
            StepAction::Fire { burst, .. } => Some(burst),
            StepAction::Skip => None,
        }
    }
}

/// One labelled execution from the run sequence
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub label: String,
    pub execution_id: String,
    pub steps: Vec<Arc<PlannedStep>>,
}

/// The full, validated run sequence
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub runs: Vec<PlannedRun>,
}

impl Plan {
    /// Resolve either config shape into a plan
    pub fn resolve(config: &ConfigFile) -> Result<Self> {
        let shape = config.shape();
        debug!(?shape, "Plan::resolve: called");

        let plan = match shape {
            ConfigShape::Full => Self::resolve_full(config)?,
            ConfigShape::Simple => Self::resolve_simple(config)?,
        };

        if plan.runs.is_empty() {
            warn!("Plan::resolve: config has no steps, nothing will run");
        }
        Ok(plan)
    }

    fn resolve_full(config: &ConfigFile) -> Result<Self> {
        let empty = BTreeMap::new();
        let burst_specs = config.req_burst.as_ref().unwrap_or(&empty);
        let bursts = burst_specs
            .iter()
            .map(|(id, spec)| Ok((id.as_str(), Burst::from_spec(id, spec)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        if config.steps.len() % 2 != 0 {
            bail!(
                "steps must alternate label and execution id, got an odd count ({})",
                config.steps.len()
            );
        }

        let mut runs = Vec::with_capacity(config.steps.len() / 2);
        for pair in config.steps.chunks(2) {
            let (label, execution_id) = (&pair[0], &pair[1]);
            let entry = config
                .executions
                .get(execution_id)
                .ok_or_else(|| eyre!("step '{}' refers to unknown execution '{}'", label, execution_id))?;
            let raw_steps = match entry {
                ExecutionEntry::Steps(steps) => steps,
                ExecutionEntry::Burst(_) => bail!(
                    "execution '{}' is a burst definition, expected a list of request-id/burst-id steps",
                    execution_id
                ),
            };

            let steps = raw_steps
                .iter()
                .map(|raw| resolve_step(raw, &config.reqs, &bursts).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;

            runs.push(PlannedRun {
                label: label.clone(),
                execution_id: execution_id.clone(),
                steps,
            });
        }

        Ok(Self { runs })
    }

    fn resolve_simple(config: &ConfigFile) -> Result<Self> {
        let mut bursts = BTreeMap::new();
        for (id, entry) in &config.executions {
            if let ExecutionEntry::Burst(spec) = entry {
                bursts.insert(id.as_str(), Burst::from_spec(id, spec)?);
            }
        }

        let runs = config
            .steps
            .iter()
            .map(|raw| {
                let step = resolve_step(raw, &config.reqs, &bursts)?;
                Ok(PlannedRun {
                    label: raw.clone(),
                    execution_id: step.step.burst_id.clone(),
                    steps: vec![Arc::new(step)],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { runs })
    }

    /// Number of steps that will actually fire
    pub fn active_steps(&self) -> usize {
        self.runs
            .iter()
            .flat_map(|run| &run.steps)
            .filter(|step| matches!(step.action, StepAction::Fire { .. }))
            .count()
    }

    /// Sum of expected fires over all active steps
    pub fn expected_fires(&self) -> u64 {
        self.runs
            .iter()
            .flat_map(|run| &run.steps)
            .filter_map(|step| step.burst())
            .map(Burst::expected_fires)
            .sum()
    }

    /// Wall-clock time the plan takes, ignoring drain time
    pub fn expected_duration(&self) -> Duration {
        self.runs
            .iter()
            .flat_map(|run| &run.steps)
            .filter_map(|step| step.burst())
            .map(|burst| burst.duration)
            .sum()
    }

    /// Human-readable listing for `rb check`
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (n, run) in self.runs.iter().enumerate() {
            let _ = writeln!(out, "{}. {} (execution: {})", n + 1, run.label, run.execution_id);
            for step in &run.steps {
                match &step.action {
                    StepAction::Skip => {
                        let _ = writeln!(out, "   - {} [skipped]", step.step.raw);
                    }
                    StepAction::Fire { request, burst } => {
                        let method = if request.method.is_empty() { "GET" } else { request.method.as_str() };
                        let _ = writeln!(
                            out,
                            "   - {}/{}: {} {} at {} for {}s (~{} requests)",
                            step.step.request_id,
                            step.step.burst_id,
                            method.to_uppercase(),
                            request.url,
                            burst.rate,
                            burst.duration.as_secs(),
                            burst.expected_fires()
                        );
                    }
                }
            }
        }
        let _ = writeln!(
            out,
            "{} active step(s), ~{} request(s), ~{}s",
            self.active_steps(),
            self.expected_fires(),
            self.expected_duration().as_secs()
        );
        out
    }
}

fn resolve_step(
    raw: &str,
    reqs: &BTreeMap<String, RequestTemplate>,
    bursts: &BTreeMap<&str, Burst>,
) -> Result<PlannedStep> {
    let step = StepRef::parse(raw)?;
    if step.is_skipped() {
        debug!(raw, "resolve_step: marked as skipped");
        return Ok(PlannedStep {
            step,
            action: StepAction::Skip,
        });
    }

    let request = reqs
        .get(&step.request_id)
        .ok_or_else(|| eyre!("step '{}' refers to unknown request '{}'", raw, step.request_id))?;
    let burst = bursts
        .get(step.burst_id.as_str())
        .copied()
        .ok_or_else(|| eyre!("step '{}' refers to unknown burst '{}'", raw, step.burst_id))?;

    Ok(PlannedStep {
        step,
        action: StepAction::Fire {
            request: Arc::new(request.clone()),
            burst,
        },
    })
}
