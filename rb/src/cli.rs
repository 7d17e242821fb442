//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// reqburst - rate-limited HTTP request bursts
#[derive(Parser)]
#[command(
    name = "rb",
    about = "Fire configured HTTP requests at fixed rates and summarize the responses",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute; `run` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every configured step and print a summary
    Run {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Cap on in-flight requests per burst (overrides settings)
        #[arg(short, long)]
        max_in_flight: Option<usize>,

        /// Don't draw progress bars
        #[arg(long)]
        no_progress: bool,
    },

    /// Load and resolve the config, print the plan, send nothing
    Check,
}

impl Default for Command {
    fn default() -> Self {
        Self::Run {
            format: OutputFormat::default(),
            max_in_flight: None,
            no_progress: false,
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = get_log_dir().join("reqburst.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Directory holding the log file
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reqburst")
        .join("logs")
}

/// Output format for the run summary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text, json, or table", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["rb"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["rb", "run"]);
        if let Some(Command::Run {
            format,
            max_in_flight,
            no_progress,
        }) = cli.command
        {
            assert_eq!(format, OutputFormat::Text);
            assert!(max_in_flight.is_none());
            assert!(!no_progress);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_flags() {
        let cli = Cli::parse_from(["rb", "run", "--format", "json", "--max-in-flight", "8", "--no-progress"]);
        if let Some(Command::Run {
            format,
            max_in_flight,
            no_progress,
        }) = cli.command
        {
            assert_eq!(format, OutputFormat::Json);
            assert_eq!(max_in_flight, Some(8));
            assert!(no_progress);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::parse_from(["rb", "check"]);
        assert!(matches!(cli.command, Some(Command::Check)));
    }

    #[test]
    fn test_cli_with_config_and_log_level() {
        let cli = Cli::parse_from(["rb", "check", "-c", "/path/to/config.json", "-l", "debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.json")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_default_command_is_run() {
        assert!(matches!(Command::default(), Command::Run { no_progress: false, .. }));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!(matches!("table".parse::<OutputFormat>(), Ok(OutputFormat::Table)));
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        let path = get_log_path();
        assert!(path.ends_with("reqburst/logs/reqburst.log"));
    }
}
