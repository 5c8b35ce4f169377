use agentforge::cmd::{self, runner::RunOutcome, CliError};
use agentforge::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agentforge")]
#[command(version, about = "Autonomous software-development pipeline substrate")]
struct Cli {
    /// Project directory the pipeline's tool bridge operates in. Defaults to
    /// the current directory.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a full pipeline run with the default template
    Start { request: String },

    /// Run the pipeline to its specification exit
    Design { request: String },

    /// Implementation with optional external design/spec inputs
    Implement {
        request: String,
        #[arg(long, conflicts_with = "from_task")]
        from_spec: Option<PathBuf>,
        #[arg(long, conflicts_with = "from_spec")]
        from_task: Option<String>,
    },

    /// Run test-authoring only, against an external specification
    Test {
        #[arg(long)]
        spec: PathBuf,
    },

    /// Run analyze -> implement for a conformance violation
    Fix { violation_id: String },

    /// Resume or extend an existing task
    Continue {
        task_id: String,
        #[arg(long, conflicts_with = "revise")]
        extend_to: Option<String>,
        #[arg(long)]
        revise: bool,
    },

    /// Provide revision feedback on a pending iteration decision
    Feedback { task_id: String, text: String },

    /// Approve the artifact awaiting an iteration decision
    Approve { task_id: String },

    /// Reject the artifact awaiting an iteration decision
    Reject { task_id: String },

    /// Dashboard data, as a table or as JSON
    Status {
        task_id: Option<String>,
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        json: bool,
    },

    /// Resolve a pending escalation with free-text guidance
    Resolve { escalation_id: String, text: String },

    /// Replay a task's recorded steps
    Replay {
        task_id: String,
        #[arg(long)]
        actions_only: bool,
    },

    /// Fork a new task from a past step of an existing one
    Fork {
        task_id: String,
        #[arg(long)]
        from_step: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let project_dir = cli.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    match run(cli, project_dir).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli, project_dir: PathBuf) -> Result<i32, CliError> {
    let cfg = Config::from_env()?;

    let code = match cli.command {
        Commands::Start { request } => {
            let (task_id, outcome) = cmd::pipeline_cmds::start(&cfg, &project_dir, &request).await?;
            report(&task_id, &outcome)
        }
        Commands::Design { request } => {
            let (task_id, outcome) = cmd::pipeline_cmds::design(&cfg, &project_dir, &request).await?;
            report(&task_id, &outcome)
        }
        Commands::Implement { request, from_spec, from_task } => {
            let (task_id, outcome) = cmd::pipeline_cmds::implement(&cfg, &project_dir, &request, from_spec, from_task).await?;
            report(&task_id, &outcome)
        }
        Commands::Test { spec } => {
            let (task_id, outcome) = cmd::pipeline_cmds::test(&cfg, &project_dir, &spec).await?;
            report(&task_id, &outcome)
        }
        Commands::Fix { violation_id } => {
            cmd::pipeline_cmds::ensure_fix_contracts(&cfg)?;
            let (task_id, outcome) = cmd::pipeline_cmds::fix(&cfg, &project_dir, &violation_id).await?;
            report(&task_id, &outcome)
        }
        Commands::Continue { task_id, extend_to, revise } => {
            let outcome = cmd::pipeline_cmds::continue_task(&cfg, &project_dir, &task_id, extend_to.as_deref(), revise).await?;
            report(&task_id, &outcome)
        }
        Commands::Feedback { task_id, text } => {
            let outcome = cmd::iteration::feedback(&cfg, &project_dir, &task_id, &text).await?;
            report(&task_id, &outcome)
        }
        Commands::Approve { task_id } => {
            let outcome = cmd::iteration::approve(&cfg, &project_dir, &task_id).await?;
            report(&task_id, &outcome)
        }
        Commands::Reject { task_id } => {
            cmd::iteration::reject(&cfg, &task_id).await?;
            println!("task {task_id} rejected");
            0
        }
        Commands::Status { task_id, watch, json } => {
            cmd::status::run(&cfg, task_id, watch, json).await?;
            0
        }
        Commands::Resolve { escalation_id, text } => {
            cmd::escalation_cmd::resolve(&cfg, &escalation_id, &text).await?;
            println!("escalation {escalation_id} resolved");
            0
        }
        Commands::Replay { task_id, actions_only } => {
            cmd::replay_cmd::replay(&cfg, &task_id, actions_only)?;
            0
        }
        Commands::Fork { task_id, from_step } => {
            let fork_id = cmd::replay_cmd::fork(&cfg, &task_id, from_step)?;
            println!("forked {task_id} at step {from_step} into {fork_id}");
            0
        }
    };

    Ok(code)
}

/// Prints the outcome and returns the exit code it corresponds to: an
/// escalation means the task is stalled pending a `resolve`, which the spec
/// treats the same as violations remaining (exit code 1), not success.
fn report(task_id: &str, outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed => {
            println!("task {task_id} completed");
            0
        }
        RunOutcome::StoppedAtStage { stage } => {
            println!("task {task_id} stopped after stage '{stage}'");
            0
        }
        RunOutcome::AwaitingDecision { stage, escalation_id } => {
            println!("task {task_id} awaiting iteration decision on stage '{stage}' (escalation {escalation_id})");
            0
        }
        RunOutcome::Escalated { stage, escalation_id, reason } => {
            println!("task {task_id} escalated at stage '{stage}': {reason} (escalation {escalation_id})");
            1
        }
    }
}
