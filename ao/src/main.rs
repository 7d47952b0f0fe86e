use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use aosched::cli::{Cli, Command, OutputFormat, RunOverrides};
use aosched::config::Config;
use aosched::{WorkloadReport, run_workload};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
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

    // stdout carries reports, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn print_report(report: &WorkloadReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let stats = &report.stats;
            println!(
                "{} Workload finished ({} mode) in {} ms",
                "✓".green(),
                report.mode.to_string().cyan(),
                report.elapsed_ms
            );
            println!("  Runs:               {}", stats.total_runs);
            println!("  Completions:        {}", stats.total_completions);
            println!("  Timer expirations:  {}", stats.total_timer_expirations);
            println!("  Cancels:            {}", stats.total_cancels);
            println!("  Ticker runs:        {}", report.ticker_runs);
            println!("  Requests completed: {}", report.requests_completed);
            println!("  Peak ready depth:   {}", stats.peak_ready_depth);
            println!("  Peak timer depth:   {}", stats.peak_timer_depth);
            if report.host_iterations > 0 {
                println!("  Host iterations:    {}", report.host_iterations);
            }
            println!();
            println!("{:<14} {:>8} {:>8} {:>6} {:>10}", "OBJECT".bold(), "PRIORITY", "STATE", "RUNS", "RUN µs");
            for obj in &report.objects {
                println!(
                    "{:<14} {:>8} {:>8} {:>6} {:>10}",
                    obj.name.yellow(),
                    obj.priority.to_string(),
                    obj.state.to_string().dimmed(),
                    obj.runs,
                    obj.run_time_us
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            mode,
            tickers,
            requesters,
            requests,
            providers,
            seed,
            format,
        } => {
            RunOverrides {
                mode,
                tickers,
                requesters,
                requests,
                providers,
                seed,
            }
            .apply(&mut config);
            info!(mode = %config.workload.mode, "ao run starting");

            let report = run_workload(&config.scheduler, &config.workload).context("Workload failed")?;
            print_report(&report, format)?;
        }
        Command::Config => {
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
            print!("{}", yaml);
        }
    }

    Ok(())
}
