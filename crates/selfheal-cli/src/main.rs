mod cmd;
mod output;
mod root;
mod services;

use clap::{Parser, Subcommand};
use cmd::{
    approvals::ApprovalsSubcommand, config::ConfigSubcommand, executions::ExecutionsSubcommand,
    jobs::JobsSubcommand, signal::SignalSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "selfheal",
    about = "Self-healing automation engine: detect operational patterns and remediate them safely",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .selfheal/)
    #[arg(long, global = true, env = "SELFHEAL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .selfheal/ in the current project
    Init,

    /// Inspect the engine configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Append activity signals to an organization's log
    Signal {
        #[command(subcommand)]
        subcommand: SignalSubcommand,
    },

    /// Detect patterns for an organization
    Scan {
        /// Organization id
        #[arg(long)]
        org: String,
        /// Restrict to these pattern types (repeatable)
        #[arg(long = "type", value_name = "TYPE")]
        pattern_types: Vec<String>,
        /// Look-back window in minutes (default from config)
        #[arg(long)]
        window: Option<u32>,
        /// Execute every matching action after detection
        #[arg(long)]
        auto_execute: bool,
        /// Simulate auto-executed actions
        #[arg(long)]
        dry_run: bool,
    },

    /// Execute one configured action through the safety gate
    Execute {
        /// Organization id
        #[arg(long)]
        org: String,
        /// Action id from actions.yaml
        action: String,
        /// Pattern that motivates the run
        #[arg(long)]
        pattern: Option<uuid::Uuid>,
        /// Reuse an execution id (resubmission returns the stored execution)
        #[arg(long)]
        id: Option<uuid::Uuid>,
        /// Simulate without side effects
        #[arg(long)]
        dry_run: bool,
        /// Operator name recorded in the audit trail
        #[arg(long, default_value = "operator")]
        by: String,
    },

    /// Manage approval requests
    Approvals {
        #[command(subcommand)]
        subcommand: ApprovalsSubcommand,
    },

    /// Update learned pattern → action mappings from execution outcomes
    Learn {
        /// Organization id
        #[arg(long)]
        org: String,
        /// Analysis window in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Undo a completed execution
    Rollback {
        /// Execution id
        id: uuid::Uuid,
        /// Operator name recorded in the audit trail
        #[arg(long, default_value = "operator")]
        by: String,
    },

    /// Inspect executions
    Executions {
        #[command(subcommand)]
        subcommand: ExecutionsSubcommand,
    },

    /// Query the audit trail
    Audit {
        /// Organization id
        #[arg(long)]
        org: String,
        /// Filter by audit action (e.g. safety_block)
        #[arg(long)]
        action: Option<String>,
        /// Filter by entity id
        #[arg(long)]
        entity: Option<String>,
        /// Only entries from the last N hours
        #[arg(long)]
        hours: Option<i64>,
        /// Keep only the most recent N entries
        #[arg(long)]
        limit: Option<usize>,
        /// Print counts instead of entries
        #[arg(long)]
        summary: bool,
    },

    /// Manage the background job queue
    Jobs {
        #[command(subcommand)]
        subcommand: JobsSubcommand,
    },

    /// Run due jobs from the queue
    Run {
        /// Run one tick and exit
        #[arg(long)]
        once: bool,
        /// Seconds between ticks
        #[arg(long, default_value = "15")]
        interval: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Signal { subcommand } => cmd::signal::run(&root, subcommand, cli.json),
        Commands::Scan {
            org,
            pattern_types,
            window,
            auto_execute,
            dry_run,
        } => cmd::scan::run(
            &root,
            cmd::scan::ScanArgs {
                org,
                pattern_types,
                window,
                auto_execute,
                dry_run,
            },
            cli.json,
        ),
        Commands::Execute {
            org,
            action,
            pattern,
            id,
            dry_run,
            by,
        } => cmd::execute::run(
            &root,
            cmd::execute::ExecuteArgs {
                org,
                action,
                pattern,
                id,
                dry_run,
                by,
            },
            cli.json,
        ),
        Commands::Approvals { subcommand } => cmd::approvals::run(&root, subcommand, cli.json),
        Commands::Learn { org, days } => cmd::learn::run(&root, &org, days, cli.json),
        Commands::Rollback { id, by } => cmd::rollback::run(&root, id, &by, cli.json),
        Commands::Executions { subcommand } => cmd::executions::run(&root, subcommand, cli.json),
        Commands::Audit {
            org,
            action,
            entity,
            hours,
            limit,
            summary,
        } => cmd::audit::run(
            &root,
            cmd::audit::AuditArgs {
                org,
                action,
                entity,
                hours,
                limit,
                summary,
            },
            cli.json,
        ),
        Commands::Jobs { subcommand } => cmd::jobs::run(&root, subcommand, cli.json),
        Commands::Run { once, interval } => cmd::run::run(&root, once, interval, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
