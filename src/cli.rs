//! Command-line surface: a config path, a dry-run flag, and a
//! repeatable verbosity flag.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ct-replicator")]
#[command(author, version, about = "Change-tracking-based SQL Server replication", long_about = None)]
pub struct Cli {
    /// Path to the replication-sets TOML configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Log every statement that would be executed without touching
    /// any destination.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Maps `--verbose` onto an `env_logger` filter, letting an
    /// operator raise verbosity without setting `RUST_LOG`.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_verbosity(verbose: u8) -> Cli {
        Cli {
            config: PathBuf::from("x.toml"),
            dry_run: false,
            verbose,
        }
    }

    #[test]
    fn verbosity_maps_to_expected_filters() {
        assert_eq!(cli_with_verbosity(0).log_filter(), "info");
        assert_eq!(cli_with_verbosity(1).log_filter(), "debug");
        assert_eq!(cli_with_verbosity(5).log_filter(), "trace");
    }
}
