use crate::output::{print_json, print_table};
use crate::services::open_engine;
use std::path::Path;

pub fn run(root: &Path, org: &str, days: Option<u32>, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let report = engine.analyze(org, days)?;
    if json {
        return print_json(&report);
    }

    println!(
        "Analyzed {} execution(s) over {} day(s).",
        report.executions_analyzed, report.window_days
    );
    if !report.new_pattern_mappings.is_empty() || !report.updated_mappings.is_empty() {
        let mut rows: Vec<Vec<String>> = report
            .new_pattern_mappings
            .iter()
            .map(|m| {
                vec![
                    m.pattern_type.clone(),
                    m.action_id.clone(),
                    "-".into(),
                    format!("{:.2}", m.confidence),
                    m.samples.to_string(),
                ]
            })
            .collect();
        rows.extend(report.updated_mappings.iter().map(|u| {
            vec![
                u.pattern_type.clone(),
                u.action_id.clone(),
                format!("{:.2}", u.previous_confidence),
                format!("{:.2}", u.confidence),
                u.samples.to_string(),
            ]
        }));
        print_table(&["PATTERN", "ACTION", "BEFORE", "AFTER", "SAMPLES"], rows);
    }
    for s in &report.suggestions {
        println!("suggestion: {s}");
    }
    Ok(())
}
