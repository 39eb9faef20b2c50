//! `replay`: reproduce, verify, and compare orchestrator runs.

mod cli;
mod compare;
mod reproduce;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use orchestrator::exit_codes;
use orchestrator::io::config::{DEFAULT_CONFIG_FILE, load_config};
use orchestrator::logging;

#[derive(Debug, Parser)]
#[command(name = "replay", version, about = "Reproduction and comparison of orchestrator runs")]
struct Cli {
    /// Pipeline configuration used to locate the runs directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Runs directory; overrides the configured one.
    #[arg(long, global = true)]
    runs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-execute a run and compare artifact hashes with the recorded manifest.
    Reproduce { run_id: String },
    /// Rehash a run's artifacts against its recorded manifest.
    Verify { run_id: String },
    /// Diff outcomes, candidate trajectories, and improvement deltas of two runs.
    Compare { run_a: String, run_b: String },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let runs_dir = match cli.runs_dir {
        Some(dir) => dir,
        None => load_config(&cli.config)?.paths.runs_dir,
    };
    match cli.command {
        Command::Reproduce { run_id } => cli::reproduce(&runs_dir, &run_id),
        Command::Verify { run_id } => cli::verify(&runs_dir, &run_id),
        Command::Compare { run_a, run_b } => cli::compare(&runs_dir, &run_a, &run_b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compare() {
        let cli = Cli::parse_from(["replay", "compare", "run-a", "run-b", "--runs-dir", "out"]);
        assert_eq!(cli.runs_dir, Some(PathBuf::from("out")));
        assert!(matches!(
            cli.command,
            Command::Compare { run_a, run_b } if run_a == "run-a" && run_b == "run-b"
        ));
    }

    #[test]
    fn parse_reproduce_defaults_config() {
        let cli = Cli::parse_from(["replay", "reproduce", "run-1"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(cli.runs_dir.is_none());
    }
}
