use crate::output::{print_json, print_table, timestamp};
use crate::services::open_engine;
use chrono::{Duration, Utc};
use selfheal_core::audit::{AuditAction, AuditFilter};
use std::path::Path;

pub struct AuditArgs {
    pub org: String,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub hours: Option<i64>,
    pub limit: Option<usize>,
    pub summary: bool,
}

pub fn run(root: &Path, args: AuditArgs, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let since = args.hours.map(|h| Utc::now() - Duration::hours(h));

    if args.summary {
        let summary = engine.audit_trail().summary(&args.org, since)?;
        if json {
            return print_json(&summary);
        }
        println!(
            "{} entries ({} simulated)",
            summary.total, summary.simulated
        );
        let rows = summary
            .by_action
            .iter()
            .map(|(a, n)| vec![a.to_string(), n.to_string()])
            .collect();
        print_table(&["ACTION", "COUNT"], rows);
        return Ok(());
    }

    let filter = AuditFilter {
        action: args
            .action
            .as_deref()
            .map(str::parse::<AuditAction>)
            .transpose()?,
        entity_type: None,
        entity_id: args.entity,
        since,
        limit: args.limit,
    };
    let entries = engine.audit(&args.org, &filter)?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                timestamp(&e.created_at),
                e.action.to_string(),
                format!("{}:{}", e.entity_type, e.entity_id),
                e.performed_by.clone(),
                if e.simulated { "sim".into() } else { String::new() },
            ]
        })
        .collect();
    print_table(&["TIME", "ACTION", "ENTITY", "BY", ""], rows);
    Ok(())
}
