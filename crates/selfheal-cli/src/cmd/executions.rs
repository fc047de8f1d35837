use crate::cmd::execute::print_summary;
use crate::output::{print_json, print_table, timestamp};
use crate::services::open_engine;
use clap::Subcommand;
use selfheal_core::execution::ExecutionStatus;
use selfheal_core::ExecutionSummary;
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ExecutionsSubcommand {
    /// List executions, newest first
    List {
        /// Organization id
        #[arg(long)]
        org: Option<String>,
        /// Filter by status (e.g. blocked, failed)
        #[arg(long)]
        status: Option<ExecutionStatus>,
        /// Show at most N executions
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one execution with its changes
    Show { id: Uuid },
}

pub fn run(root: &Path, subcmd: ExecutionsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ExecutionsSubcommand::List { org, status, limit } => {
            list(root, org.as_deref(), status, limit, json)
        }
        ExecutionsSubcommand::Show { id } => show(root, id, json),
    }
}

fn list(
    root: &Path,
    org: Option<&str>,
    status: Option<ExecutionStatus>,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let mut executions: Vec<_> = engine
        .executions(org)?
        .into_iter()
        .filter(|e| status.map_or(true, |s| e.status == s))
        .collect();
    executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    if let Some(n) = limit {
        executions.truncate(n);
    }

    if json {
        return print_json(&executions);
    }
    if executions.is_empty() {
        println!("No executions.");
        return Ok(());
    }
    let rows = executions
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.organization_id.clone(),
                e.action_id.clone(),
                e.status.to_string(),
                e.triggered_by.to_string(),
                if e.dry_run { "yes".into() } else { String::new() },
                timestamp(&e.started_at),
            ]
        })
        .collect();
    print_table(
        &["ID", "ORG", "ACTION", "STATUS", "TRIGGER", "DRY", "STARTED"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: Uuid, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let execution = engine.execution(id)?;
    if json {
        return print_json(&execution);
    }
    let changes = execution.changes().to_vec();
    print_summary(&ExecutionSummary {
        gate: execution.gate.clone(),
        execution,
        approval: None,
    });
    for c in &changes {
        println!(
            "  - {} {}:{}",
            c.change_type, c.entity_type, c.entity_id
        );
    }
    Ok(())
}
