use crate::cmd::execute::print_summary;
use crate::output::{print_json, print_table, short_id, timestamp};
use crate::services::{block_on, open_engine};
use clap::Subcommand;
use selfheal_core::approval::Decision;
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ApprovalsSubcommand {
    /// List approval requests (open ones unless --all)
    List {
        /// Organization id
        #[arg(long)]
        org: Option<String>,
        /// Include decided and expired requests
        #[arg(long)]
        all: bool,
    },

    /// Approve a pending request; the execution starts if the gate still passes
    Approve {
        id: Uuid,
        /// Approver name
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Reject a pending request; the execution is blocked
    Reject {
        id: Uuid,
        /// Approver name
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Escalate overdue requests and expire stale ones
    Sweep {
        /// Organization id
        #[arg(long)]
        org: String,
    },
}

pub fn run(root: &Path, subcmd: ApprovalsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ApprovalsSubcommand::List { org, all } => list(root, org.as_deref(), all, json),
        ApprovalsSubcommand::Approve { id, by, reason } => {
            decide(root, id, Decision::Approve, &by, reason, json)
        }
        ApprovalsSubcommand::Reject { id, by, reason } => {
            decide(root, id, Decision::Reject, &by, reason, json)
        }
        ApprovalsSubcommand::Sweep { org } => sweep(root, &org, json),
    }
}

fn list(root: &Path, org: Option<&str>, all: bool, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let requests: Vec<_> = engine
        .approvals(org)?
        .into_iter()
        .filter(|r| all || r.status.is_open())
        .collect();

    if json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No approval requests.");
        return Ok(());
    }
    let rows = requests
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.organization_id.clone(),
                r.action_id.clone(),
                r.status.to_string(),
                r.current_approver()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".into()),
                short_id(&r.execution_id),
                timestamp(&r.expires_at),
            ]
        })
        .collect();
    print_table(
        &["ID", "ORG", "ACTION", "STATUS", "APPROVER", "EXECUTION", "EXPIRES"],
        rows,
    );
    Ok(())
}

fn decide(
    root: &Path,
    id: Uuid,
    decision: Decision,
    by: &str,
    reason: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let summary = block_on(engine.decide_approval(id, decision, by, reason))??;
    if json {
        print_json(&summary)
    } else {
        print_summary(&summary);
        Ok(())
    }
}

fn sweep(root: &Path, org: &str, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let report = block_on(engine.maintain_approvals(org))??;
    if json {
        return print_json(&report);
    }
    println!(
        "Escalated {}, expired {}, exhausted {}; {} execution(s) blocked.",
        report.escalated.len(),
        report.expired.len(),
        report.exhausted.len(),
        report.blocked_executions.len()
    );
    Ok(())
}
