use crate::output::print_json;
use crate::services::{block_on, open_engine};
use selfheal_core::{ExecuteRequest, ExecutionSummary};
use std::path::Path;

pub struct ExecuteArgs {
    pub org: String,
    pub action: String,
    pub pattern: Option<uuid::Uuid>,
    pub id: Option<uuid::Uuid>,
    pub dry_run: bool,
    pub by: String,
}

pub fn run(root: &Path, args: ExecuteArgs, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let mut req = ExecuteRequest::manual(&args.org, &args.action);
    req.pattern_id = args.pattern;
    req.execution_id = args.id;
    req.dry_run = args.dry_run;
    req.performed_by = args.by;

    let summary = block_on(engine.execute(req))??;
    if json {
        print_json(&summary)
    } else {
        print_summary(&summary);
        Ok(())
    }
}

/// Human-readable outcome of one execution.
pub fn print_summary(summary: &ExecutionSummary) {
    let e = &summary.execution;
    let dry = if e.dry_run { " (dry run)" } else { "" };
    println!("Execution {} [{}]{dry}: {}", e.id, e.action_id, e.status);

    if let Some(gate) = &summary.gate {
        for check in gate.checks.iter().filter(|c| !c.passed) {
            println!("  check {} failed: {}", check.name, check.message);
        }
    }
    if let Some(reason) = &e.blocked_reason {
        println!("  blocked: {reason}");
    }
    if let Some(err) = &e.error_message {
        println!("  error: {err}");
    }
    if let Some(approval) = &summary.approval {
        println!(
            "  awaiting approval {} (expires {})",
            approval.id,
            crate::output::timestamp(&approval.expires_at)
        );
    }
    if let Some(result) = &e.result {
        println!(
            "  {} change(s), {} entit(ies) affected",
            result.changes.len(),
            result.affected_entities.len()
        );
        for (k, v) in &result.metrics {
            println!("  {k}: {v}");
        }
    }
}
