//! reqburst configuration types and loading
//!
//! The config is a single JSON document read once at startup. Two shapes are
//! accepted; see [`ConfigFile::shape`].

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILENAME: &str = "config.json";

/// The whole JSON config document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Request templates by request id
    #[serde(default)]
    pub reqs: BTreeMap<String, RequestTemplate>,

    /// Burst definitions by burst id (full shape only)
    #[serde(default)]
    pub req_burst: Option<BTreeMap<String, BurstSpec>>,

    /// Full shape: execution id -> step list.
    /// Simple shape: burst id -> burst definition.
    #[serde(default)]
    pub executions: BTreeMap<String, ExecutionEntry>,

    /// Full shape: alternating label, execution id.
    /// Simple shape: "request-id/burst-id" entries.
    #[serde(default)]
    pub steps: Vec<String>,

    /// Runtime settings
    #[serde(default)]
    pub settings: Settings,
}

/// Which of the two layouts a config uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigShape {
    /// `reqs` + `req_burst` + `executions` (step lists) + labelled `steps`
    Full,
    /// `reqs` + `executions` (bursts) + `"req/burst"` steps
    Simple,
}

/// One value of the `executions` map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionEntry {
    /// Ordered `"request-id/burst-id"` steps
    Steps(Vec<String>),
    /// A burst definition (simple shape)
    Burst(BurstSpec),
}

/// Declarative HTTP request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub url: String,

    /// HTTP method; empty means GET
    #[serde(default)]
    pub method: String,

    /// Header name -> values, each value sent as its own header line
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,

    /// Request body, sent as its JSON text
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl RequestTemplate {
    /// Body bytes, if the template has a non-null body
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        match &self.body {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => serde_json::to_vec(value).ok(),
        }
    }
}

/// Raw burst definition: a rate (per minute or per second) and a duration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstSpec {
    /// Requests per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,

    /// Requests per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rps: Option<u32>,

    /// Duration in seconds
    pub duration: u64,
}

/// Runtime settings (`settings` object in the config)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Cap on in-flight requests per burst; unbounded when absent
    #[serde(rename = "max-in-flight")]
    pub max_in_flight: Option<usize>,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Capacity of each executor's result queue
    #[serde(rename = "result-buffer")]
    pub result_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: None,
            timeout_ms: 30_000,
            max_in_flight: None,
            user_agent: format!("reqburst/{}", env!("CARGO_PKG_VERSION")),
            result_buffer: execs::executor::DEFAULT_RESULT_BUFFER,
        }
    }
}

impl Settings {
    /// Per-request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ConfigFile {
    /// Detect the layout
    ///
    /// A config with `req_burst`, or with any execution given as a step list,
    /// is the full shape. Everything else is the simple shape.
    pub fn shape(&self) -> ConfigShape {
        let has_step_lists = self
            .executions
            .values()
            .any(|entry| matches!(entry, ExecutionEntry::Steps(_)));
        if self.req_burst.is_some() || has_step_lists {
            ConfigShape::Full
        } else {
            ConfigShape::Simple
        }
    }

    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./config.json`, then
    /// `<config dir>/reqburst/config.json`. There is no built-in default
    /// plan, so finding nothing is an error.
    pub fn load(config_path: Option<&PathBuf>) -> Result<(Self, PathBuf)> {
        if let Some(path) = config_path {
            let config =
                Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?;
            return Ok((config, path.clone()));
        }

        let candidates = Self::default_paths();
        for candidate in &candidates {
            if candidate.exists() {
                let config = Self::load_from_file(candidate)
                    .context(format!("Failed to load config from {}", candidate.display()))?;
                return Ok((config, candidate.clone()));
            }
        }

        let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(eyre::eyre!("No config file found (searched: {})", searched.join(", ")))
    }

    /// Read just the log level, ignoring every error
    ///
    /// Used before logging is set up, so failures here stay silent and
    /// surface later from the full load.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::default_paths().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;
        value
            .get("settings")?
            .get("log-level")?
            .as_str()
            .map(|s| s.to_string())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_json(&content)?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config file")
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("reqburst").join(CONFIG_FILENAME));
        }
        paths
    }
}
