//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::workload::HostMode;

/// ao - active object scheduler workbench
#[derive(Parser, Debug)]
#[command(name = "ao", author, version, about = "Drive a per-thread active object scheduler", long_about = None)]
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

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the synthetic workload and report scheduler statistics
    Run {
        /// Host mode (blocking, non-blocking)
        #[arg(short, long)]
        mode: Option<HostMode>,

        /// Number of periodic timer objects
        #[arg(long)]
        tickers: Option<usize>,

        /// Number of cross-thread requesters
        #[arg(long)]
        requesters: Option<usize>,

        /// Requests issued by each requester
        #[arg(long)]
        requests: Option<u32>,

        /// Provider threads completing requests
        #[arg(long)]
        providers: Option<usize>,

        /// Seed for provider latencies
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Workload overrides taken from `ao run`
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub mode: Option<HostMode>,
    pub tickers: Option<usize>,
    pub requesters: Option<usize>,
    pub requests: Option<u32>,
    pub providers: Option<usize>,
    pub seed: Option<u64>,
}

impl RunOverrides {
    /// Apply the overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        debug!(?self, "RunOverrides::apply: called");
        let workload = &mut config.workload;
        if let Some(mode) = self.mode {
            workload.mode = mode;
        }
        if let Some(tickers) = self.tickers {
            workload.tickers = tickers;
        }
        if let Some(requesters) = self.requesters {
            workload.requesters = requesters;
        }
        if let Some(requests) = self.requests {
            workload.requests = requests;
        }
        if let Some(providers) = self.providers {
            workload.providers = providers;
        }
        if self.seed.is_some() {
            workload.seed = self.seed;
        }
    }
}

/// Output format for run reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "ao",
            "--log-level",
            "debug",
            "run",
            "--mode",
            "non-blocking",
            "--tickers",
            "2",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run {
                mode, tickers, format, ..
            } => {
                assert_eq!(mode, Some(HostMode::NonBlocking));
                assert_eq!(tickers, Some(2));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["ao", "run", "--format", "table"]).is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        let overrides = RunOverrides {
            requesters: Some(9),
            seed: Some(3),
            ..Default::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.workload.requesters, 9);
        assert_eq!(config.workload.seed, Some(3));
        assert_eq!(config.workload.tickers, 3);
    }
}
