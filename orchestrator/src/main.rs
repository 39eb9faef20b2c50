//! `orchestrator` command line.
//!
//! Runs design loops, resumes gated runs, and inspects the candidate store.
//! Exit codes are listed in [`orchestrator::exit_codes`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use orchestrator::agents::HeuristicAgents;
use orchestrator::core::failures::FailureType;
use orchestrator::core::sequence::parse_fasta;
use orchestrator::design_loop::{DesignRequest, LoopStop, run_design};
use orchestrator::exit_codes;
use orchestrator::io::candidate_store::CandidateStore;
use orchestrator::io::config::{DEFAULT_CONFIG_FILE, PipelineConfig, load_config, write_config};
use orchestrator::io::executor::LocalExecutor;
use orchestrator::io::human_gate::{sign_decision_file, validate_human_decision};
use orchestrator::io::workspace::to_pretty_json;
use orchestrator::logging;
use orchestrator::resume::{ResumeOutcome, resume_run};

#[derive(Debug, Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Deterministic protein-design run orchestrator"
)]
struct Cli {
    /// Pipeline configuration (defaults apply when the file is missing).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a design loop for one input sequence.
    Run(RunArgs),
    /// Resume a run awaiting human review once its decision is signed.
    Resume { run_id: String },
    /// Inspect the candidate store.
    Candidates {
        #[command(subcommand)]
        command: CandidatesCommand,
    },
    /// Validate or sign a human decision file.
    Decision {
        #[command(subcommand)]
        command: DecisionCommand,
    },
    /// Manage the pipeline configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["sequence", "fasta"])))]
struct RunArgs {
    /// Amino-acid sequence.
    #[arg(long)]
    sequence: Option<String>,
    /// FASTA file; the first record is used.
    #[arg(long)]
    fasta: Option<PathBuf>,
    /// Explicit run id instead of a generated one.
    #[arg(long)]
    run_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CandidatesCommand {
    /// List stored candidate ids.
    List,
    /// Print a candidate and its version history.
    Show { candidate_id: String },
    /// List version ids of a candidate, oldest first.
    Versions { candidate_id: String },
    /// Remove a candidate and all of its versions.
    Delete { candidate_id: String },
}

#[derive(Debug, Subcommand)]
enum DecisionCommand {
    /// Check a decision file and print its status.
    Validate { path: PathBuf },
    /// Recompute the signature of an edited decision file.
    Sign { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write the default configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
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
    match cli.command {
        Command::Run(args) => cmd_run(load_config(&cli.config)?, args),
        Command::Resume { run_id } => cmd_resume(&load_config(&cli.config)?, &run_id),
        Command::Candidates { command } => cmd_candidates(&load_config(&cli.config)?, command),
        Command::Decision { command } => cmd_decision(command),
        Command::Config {
            command: ConfigCommand::Init { force },
        } => cmd_config_init(&cli.config, force),
    }
}

fn cmd_run(config: PipelineConfig, args: RunArgs) -> Result<i32> {
    let sequence = match (args.sequence, args.fasta) {
        (Some(sequence), _) => sequence,
        (None, Some(path)) => {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            parse_fasta(&contents)
        }
        (None, None) => bail!("either --sequence or --fasta is required"),
    };
    let store = CandidateStore::open(&config.paths.store_dir)?;
    let executor = LocalExecutor::with_builtin_tools()?;
    let mut request = DesignRequest::new(sequence, config);
    request.run_id = args.run_id;

    let outcome = run_design(&request, &HeuristicAgents, &executor, &store)?;
    print!("{}", to_pretty_json(&outcome.summary)?);
    Ok(match outcome.stop {
        LoopStop::Failed {
            failure_type: FailureType::InputInvalid,
        } => exit_codes::INVALID,
        _ => exit_codes::for_outcome(outcome.summary.outcome),
    })
}

fn cmd_resume(config: &PipelineConfig, run_id: &str) -> Result<i32> {
    let store = CandidateStore::open(&config.paths.store_dir)?;
    match resume_run(&config.paths.runs_dir, run_id, &store)? {
        ResumeOutcome::Resolved(resolution) => {
            print!("{}", to_pretty_json(&resolution)?);
            Ok(exit_codes::for_outcome(resolution.outcome))
        }
        ResumeOutcome::Blocked(err) => {
            eprintln!("{err}");
            Ok(exit_codes::INVALID)
        }
    }
}

fn cmd_candidates(config: &PipelineConfig, command: CandidatesCommand) -> Result<i32> {
    let store = CandidateStore::open(&config.paths.store_dir)?;
    match command {
        CandidatesCommand::List => {
            for id in store.list()? {
                println!("{id}");
            }
        }
        CandidatesCommand::Show { candidate_id } => {
            print!("{}", to_pretty_json(&store.get(&candidate_id)?)?);
        }
        CandidatesCommand::Versions { candidate_id } => {
            for version_id in store.list_versions(&candidate_id)? {
                println!("{version_id}");
            }
        }
        CandidatesCommand::Delete { candidate_id } => {
            store.delete_candidate(&candidate_id)?;
            println!("{candidate_id}");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_decision(command: DecisionCommand) -> Result<i32> {
    match command {
        DecisionCommand::Validate { path } => match validate_human_decision(&path) {
            Ok(decision) => {
                println!("{}", decision.status.as_str());
                Ok(exit_codes::OK)
            }
            Err(err) => {
                eprintln!("{err}");
                Ok(exit_codes::INVALID)
            }
        },
        DecisionCommand::Sign { path } => {
            println!("{}", sign_decision_file(&path)?);
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_config_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &PipelineConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}
