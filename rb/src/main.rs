//! rb - fire configured HTTP request bursts and summarize the responses

use std::fs;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use reqburst::cli::{Cli, Command, OutputFormat, get_log_dir, get_log_path};
use reqburst::config::ConfigFile;
use reqburst::plan::Plan;
use reqburst::runner::{RunOptions, Runner};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    fs::create_dir_all(get_log_dir()).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(get_log_path()).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = ConfigFile::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let (config, config_path) = ConfigFile::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(path = %config_path.display(), shape = ?config.shape(), "reqburst loaded config");

    let plan = Plan::resolve(&config).context("Invalid run plan")?;

    let command = cli.command.unwrap_or_default();
    debug!(?command, "main: dispatching command");
    match command {
        Command::Run {
            format,
            max_in_flight,
            no_progress,
        } => {
            let options = RunOptions {
                max_in_flight,
                progress: !no_progress && format != OutputFormat::Json,
            };
            cmd_run(plan, config, options, format).await
        }
        Command::Check => cmd_check(&plan, &config_path),
    }
}

/// Run the plan and print the summary
async fn cmd_run(plan: Plan, config: ConfigFile, options: RunOptions, format: OutputFormat) -> Result<()> {
    debug!(?options, %format, "cmd_run: called");
    if plan.active_steps() == 0 {
        warn!("cmd_run: nothing to run");
        eprintln!("{} no active steps in config", "warning:".yellow());
    }

    let runner = Runner::new(plan, config.settings, options)?;
    let report = runner.run().await?;
    let summary = report.summary();

    if format != OutputFormat::Json {
        println!(
            "{} {} request(s) in {:.1}s",
            "Finished:".green().bold(),
            summary.total,
            report.elapsed.as_secs_f64()
        );
    }
    print!("{}", summary.render(format)?);

    for (burst_id, drain) in &report.drains {
        if !drain.is_clean() {
            eprintln!("{} burst '{}' did not drain cleanly: {:?}", "warning:".yellow(), burst_id, drain);
        }
    }
    Ok(())
}

/// Print the resolved plan without sending anything
fn cmd_check(plan: &Plan, config_path: &std::path::Path) -> Result<()> {
    debug!(path = %config_path.display(), "cmd_check: called");
    println!("{} {}", "Config:".bold(), config_path.display());
    print!("{}", plan.describe());
    println!("Logs are written to: {}", get_log_path().display());
    Ok(())
}
