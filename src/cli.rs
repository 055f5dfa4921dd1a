/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::CliOverrides;

// Build timestamp injected at compile time by build.rs
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser, Debug)]
#[command(name = "edgebeat")]
#[command(author, version = VERSION_WITH_BUILD, about = "Edge host telemetry agent", long_about = None)]
pub struct Cli {
    /// Config file (YAML or TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Collection interval, e.g. 30s or 2m
    #[arg(short, long, global = true, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// HTTP listen address
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Log level or filter directives
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the agent (default)
    Run,

    /// Collect one snapshot and print it
    Collect {
        /// Pretty-print the JSON
        #[arg(short, long)]
        pretty: bool,

        /// Print a one-line summary instead of JSON
        #[arg(short, long, conflicts_with = "pretty")]
        summary: bool,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            interval: self.interval,
            address: self.address.clone(),
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_carries_build_time() {
        assert!(VERSION_WITH_BUILD.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(VERSION_WITH_BUILD.contains(" (built: "));
        assert_eq!(Cli::command().get_version(), Some(VERSION_WITH_BUILD));
    }

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["edgebeat"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.overrides().interval.is_none());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "edgebeat",
            "collect",
            "--pretty",
            "--interval",
            "2m 30s",
            "--address",
            "127.0.0.1:9100",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Commands::Collect { pretty: true, summary: false }));
        let overrides = cli.overrides();
        assert_eq!(overrides.interval, Some(Duration::from_secs(150)));
        assert_eq!(overrides.address.as_deref(), Some("127.0.0.1:9100"));
        assert!(overrides.json_logs);
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        assert!(Cli::try_parse_from(["edgebeat", "--interval", "soon"]).is_err());
        assert!(Cli::try_parse_from(["edgebeat", "collect", "--pretty", "--summary"]).is_err());
    }
}
