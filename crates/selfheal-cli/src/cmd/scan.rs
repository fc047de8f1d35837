use crate::output::{print_json, print_table, short_id};
use crate::services::{block_on, open_engine};
use selfheal_core::ScanRequest;
use std::path::Path;

pub struct ScanArgs {
    pub org: String,
    pub pattern_types: Vec<String>,
    pub window: Option<u32>,
    pub auto_execute: bool,
    pub dry_run: bool,
}

pub fn run(root: &Path, args: ScanArgs, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let req = ScanRequest {
        organization_id: args.org,
        pattern_types: (!args.pattern_types.is_empty()).then_some(args.pattern_types),
        time_window_minutes: args.window,
        auto_execute: args.auto_execute,
        dry_run: args.dry_run,
    };
    let report = block_on(engine.scan(req))??;

    if json {
        return print_json(&report);
    }

    if report.patterns.is_empty() {
        println!("No patterns detected ({} ms).", report.scan_duration_ms);
    } else {
        let rows = report
            .patterns
            .iter()
            .map(|p| {
                vec![
                    short_id(&p.id),
                    p.pattern_type.clone(),
                    p.severity.to_string(),
                    format!("{:.2}", p.confidence),
                    p.occurrences.to_string(),
                    p.affected_entities.len().to_string(),
                ]
            })
            .collect();
        print_table(
            &["ID", "TYPE", "SEVERITY", "CONFIDENCE", "SIGNALS", "ENTITIES"],
            rows,
        );
    }

    if !report.recommendations.is_empty() {
        println!("\nRecommendations:");
        for r in &report.recommendations {
            println!(
                "  {} -> {} ({:.2})",
                r.pattern_type, r.action_id, r.confidence
            );
        }
    }

    if !report.executions.is_empty() {
        println!("\nExecutions:");
        for s in &report.executions {
            let e = &s.execution;
            let note = e
                .blocked_reason
                .as_deref()
                .or(e.error_message.as_deref())
                .unwrap_or("");
            println!("  {} {} {} {}", short_id(&e.id), e.action_id, e.status, note);
        }
    }
    for err in &report.errors {
        eprintln!("warning: {err}");
    }
    Ok(())
}
