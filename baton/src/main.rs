//! `baton`: drive one agent session per invocation against a project root.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use baton::bearings::assemble_bearings;
use baton::core::types::{CommitOutcome, SessionKind, Verification};
use baton::exit_codes;
use baton::io::config::{BatonConfig, load_config};
use baton::io::git::Git;
use baton::io::lock::LockMode;
use baton::io::paths::ProjectPaths;
use baton::io::provider::ChatCompletionsProvider;
use baton::io::store::FsStore;
use baton::io::verify::CommandVerifier;
use baton::logging;
use baton::session::{Coordinator, SessionError, SessionOutcome};
use baton::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "baton",
    version,
    about = "Resumable agent-session coordinator"
)]
struct Cli {
    /// Project root holding feature_list.json, claude-progress.txt and workspace/.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Model provider credential.
    #[arg(long, global = true, env = "BATON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Override `model.base_url` from config.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Override `model.name` from config.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Wait for a concurrent session to finish instead of failing.
    #[arg(long, global = true)]
    wait: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Initialization session: plan features, write init.sh, make the first commit.
    Init {
        /// What to build.
        task: String,
    },
    /// Coding session (default): implement one feature, or follow INSTRUCTION.
    Code {
        /// Overrides the default "pick the next feature" directive.
        instruction: Option<String>,
    },
    /// Print the bearings snapshot as JSON.
    Bearings,
    /// Check the ledger schema and progress-log format.
    Validate,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ProjectPaths::new(&cli.root);

    match command_kind(cli.command.as_ref()) {
        CommandKind::Session(kind) => {
            let config = load_effective_config(&cli, &paths)?;
            cmd_session(&cli, paths, config, &kind)
        }
        CommandKind::Bearings => {
            let config = load_effective_config(&cli, &paths)?;
            cmd_bearings(&paths, &config)
        }
        CommandKind::Validate => cmd_validate(&paths),
    }
}

enum CommandKind {
    Session(SessionKind),
    Bearings,
    Validate,
}

/// No subcommand means a coding session without an instruction.
fn command_kind(command: Option<&Command>) -> CommandKind {
    match command {
        Some(Command::Init { task }) => CommandKind::Session(SessionKind::Initialize {
            task: task.clone(),
        }),
        Some(Command::Code { instruction }) => CommandKind::Session(SessionKind::Coding {
            instruction: instruction.clone(),
        }),
        None => CommandKind::Session(SessionKind::Coding { instruction: None }),
        Some(Command::Bearings) => CommandKind::Bearings,
        Some(Command::Validate) => CommandKind::Validate,
    }
}

fn load_effective_config(cli: &Cli, paths: &ProjectPaths) -> Result<BatonConfig> {
    let mut config = load_config(&paths.config_path)?;
    if let Some(base_url) = &cli.base_url {
        config.model.base_url = base_url.clone();
    }
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    config
        .validate()
        .context("invalid configuration after command-line overrides")?;
    Ok(config)
}

fn cmd_session(
    cli: &Cli,
    paths: ProjectPaths,
    config: BatonConfig,
    kind: &SessionKind,
) -> Result<i32> {
    let api_key = cli
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow!("--api-key (or BATON_API_KEY) is required for sessions"))?;
    let provider = ChatCompletionsProvider::new(&config.model, api_key)?;
    let verifier = CommandVerifier::from_config(&config.verify);
    let lock_mode = if cli.wait {
        LockMode::Wait
    } else {
        LockMode::FailFast
    };

    println!("starting {} session in {}", kind.as_str(), paths.root.display());
    let coordinator = Coordinator::new(
        FsStore::new(&paths.root),
        Git::new(&paths.workspace_dir),
        provider,
        verifier,
        paths,
        config,
    )
    .with_lock_mode(lock_mode);

    let outcome = coordinator.run(kind)?;
    print_outcome(&outcome);
    Ok(exit_codes::OK)
}

fn cmd_bearings(paths: &ProjectPaths, config: &BatonConfig) -> Result<i32> {
    let store = FsStore::new(&paths.root);
    let git = Git::new(&paths.workspace_dir);
    let snapshot = assemble_bearings(&store, &git, paths, config)?;
    let json =
        serde_json::to_string_pretty(&snapshot.bearings).context("serialize bearings")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &ProjectPaths) -> Result<i32> {
    let store = FsStore::new(&paths.root);
    let report = validate_project(&store, paths)?;
    for problem in &report.problems {
        eprintln!("{problem}");
    }
    println!("{}", report.summary());
    if report.is_ok() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}

fn print_outcome(outcome: &SessionOutcome) {
    println!("session {} ({}) logged", outcome.session_id, outcome.kind);
    if !outcome.files_written.is_empty() {
        println!("files written: {}", outcome.files_written.join(", "));
    }
    if outcome.startup_script_written {
        println!("startup script written: init.sh");
    }
    if let Some((records, passing)) = outcome.ledger {
        println!("ledger: {records} features, {passing} passing");
    }
    if outcome.restored_records > 0 {
        println!("restored {} features the agent dropped", outcome.restored_records);
    }
    match (&outcome.completed_feature, outcome.verification) {
        (Some(feature), _) => println!("completed: {feature}"),
        (None, Verification::Failed) => println!("verification failed; completion not recorded"),
        (None, _) => {}
    }
    match &outcome.commit {
        CommitOutcome::Committed => println!("committed"),
        CommitOutcome::Failed { reason } => println!("commit skipped: {reason}"),
    }
    if outcome.pushed == Some(false) {
        println!("push failed (see logs)");
    }
    println!("progress: {}", outcome.progress_entry);
}

/// Map typed session failures to stable exit codes.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::Locked { .. }) => exit_codes::LOCKED,
        Some(SessionError::ModelCall { .. }) => exit_codes::MODEL_FAILED,
        Some(
            SessionError::MissingArtifact { .. }
            | SessionError::UnsafePath { .. }
            | SessionError::InvalidOutput(_),
        ) => exit_codes::NO_ARTIFACT,
        Some(SessionError::InvalidLedger { .. } | SessionError::TooManyCompletions { .. }) => {
            exit_codes::LEDGER_REJECTED
        }
        None => exit_codes::FAILED,
    }
}
