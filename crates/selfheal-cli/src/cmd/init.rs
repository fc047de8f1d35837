use anyhow::Context;
use selfheal_core::{config::EngineConfig, io, paths};
use std::path::Path;

const ACTIONS_TEMPLATE: &str = "\
# Automated actions, one entry per (organization, action id).
#
# actions:
#   - id: remind-owner
#     organization_id: org-1
#     name: Remind the owner of stalled work
#     trigger_type: pattern
#     trigger_config:
#       pattern_types: [stalled_work]
#       min_severity: medium
#     action_type: reminder
#     action_config:
#       kind: reminder
#       recipients:
#         - type: role
#           name: lead
#       channel: email
#       message_template: \"{{pattern.description}} ({{pattern.occurrences}} signals)\"
#       repeat_interval_minutes: 60
#       max_reminders: 3
actions: []
";

const DIRECTORY_TEMPLATE: &str = "\
# People the engine may contact or hand work to, per organization.
#
# organizations:
#   org-1:
#     - id: u-1
#       name: Ada
#       roles: [lead]
#       addresses:
#         email: ada@example.com
organizations: {}
";

const WORKLOAD_TEMPLATE: &str = "\
# Open work items and their assignees.
items: []
";

const OPERATIONS_TEMPLATE: &str = "\
# Named operations the retry action may re-run, as shell commands.
operations: {}
";

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing selfheal in: {}", root.display());

    for dir in [paths::SELFHEAL_DIR, paths::SIGNALS_DIR, paths::OUTBOX_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        EngineConfig::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let templates = [
        (paths::ACTIONS_FILE, ACTIONS_TEMPLATE),
        (paths::DIRECTORY_FILE, DIRECTORY_TEMPLATE),
        (paths::WORKLOAD_FILE, WORKLOAD_TEMPLATE),
        (paths::OPERATIONS_FILE, OPERATIONS_TEMPLATE),
    ];
    for (rel, content) in templates {
        let written = io::write_if_missing(&root.join(rel), content.as_bytes())
            .with_context(|| format!("failed to write {rel}"))?;
        println!("  {} {rel}", if written { "created:" } else { "exists: " });
    }

    println!("\nselfheal initialized.");
    println!("Next: edit {} and run `selfheal config validate`", paths::ACTIONS_FILE);
    Ok(())
}
