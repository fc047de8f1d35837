#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn selfheal(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("selfheal").unwrap();
    cmd.current_dir(dir.path())
        .env("SELFHEAL_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    selfheal(dir).arg("init").assert().success();
}

const DIRECTORY: &str = "\
organizations:
  org-1:
    - id: u-1
      name: Ada
      roles: [lead]
      addresses:
        email: ada@example.com
    - id: u-2
      name: Grace
      roles: [director]
      addresses:
        email: grace@example.com
";

const ACTIONS: &str = "\
actions:
  - id: notify-leads
    organization_id: org-1
    name: Notify leads
    trigger_type: pattern
    trigger_config:
      pattern_types: [stalled_work]
    action_type: notify
    action_config:
      kind: notify
      recipients:
        - type: role
          name: lead
      channel: email
      message_template: \"{{recipient.name}}: {{action.name}}\"
  - id: move-work
    organization_id: org-1
    name: Move work off u-1
    trigger_type: threshold
    action_type: redistribute
    action_config:
      kind: redistribute
      from_assignee: u-1
      to_assignee: u-2
";

const WORKLOAD: &str = "\
items:
  - id: w-1
    organization_id: org-1
    title: Payroll export
    assignee: u-1
  - id: w-2
    organization_id: org-1
    title: Vendor review
    assignee: u-1
";

/// An initialized project with a directory, workload and two actions.
fn seeded_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(dir.path().join(".selfheal/directory.yaml"), DIRECTORY).unwrap();
    std::fs::write(dir.path().join(".selfheal/actions.yaml"), ACTIONS).unwrap();
    std::fs::write(dir.path().join(".selfheal/workload.yaml"), WORKLOAD).unwrap();
    dir
}

fn json_out(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.arg("--json").output().unwrap();
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn record_signal(dir: &TempDir, kind: &str, entity: &str) {
    selfheal(dir)
        .args([
            "signal", "record", "--org", "org-1", "--kind", kind, "--entity", entity,
        ])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// selfheal init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_directory_tree() {
    let dir = TempDir::new().unwrap();
    selfheal(&dir).arg("init").assert().success();

    assert!(dir.path().join(".selfheal").is_dir());
    assert!(dir.path().join(".selfheal/signals").is_dir());
    assert!(dir.path().join(".selfheal/outbox").is_dir());
    assert!(dir.path().join(".selfheal/config.yaml").exists());
    assert!(dir.path().join(".selfheal/actions.yaml").exists());
    assert!(dir.path().join(".selfheal/directory.yaml").exists());
}

#[test]
fn init_is_idempotent_and_keeps_edits() {
    let dir = seeded_project();
    selfheal(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:"));
    let actions = std::fs::read_to_string(dir.path().join(".selfheal/actions.yaml")).unwrap();
    assert!(actions.contains("notify-leads"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    selfheal(&dir)
        .args(["scan", "--org", "org-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("selfheal init"));
}

#[test]
fn config_validate_warns_about_empty_escalation_chain() {
    let dir = seeded_project();
    selfheal(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning] approval.escalation_chain is empty"));
}

#[test]
fn config_validate_passes_with_escalation_chain() {
    let dir = seeded_project();
    std::fs::write(
        dir.path().join(".selfheal/config.yaml"),
        "approval:\n  escalation_chain:\n    - type: role\n      name: lead\n    - type: role\n      name: director\n",
    )
    .unwrap();
    selfheal(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 action(s) checked"));
}

#[test]
fn config_validate_reports_bad_action() {
    let dir = seeded_project();
    let bad = ACTIONS.replace("to_assignee: u-2", "to_assignee: u-1");
    std::fs::write(dir.path().join(".selfheal/actions.yaml"), bad).unwrap();

    selfheal(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("org-1/move-work"))
        .stdout(predicate::str::contains("must differ"));
}

// ---------------------------------------------------------------------------
// selfheal signal / scan
// ---------------------------------------------------------------------------

#[test]
fn scan_detects_pattern_from_recorded_signals() {
    let dir = seeded_project();
    for entity in ["t-1", "t-2", "t-3"] {
        record_signal(&dir, "stalled_work", entity);
    }
    record_signal(&dir, "missed_deadline", "t-9");

    let report = json_out(selfheal(&dir).args(["scan", "--org", "org-1"]));
    let patterns = report["patterns"].as_array().unwrap();
    assert_eq!(patterns.len(), 1, "below-threshold signal kinds are ignored");
    assert_eq!(patterns[0]["type"], "stalled_work");
    assert_eq!(patterns[0]["occurrences"], 3);
    assert!(report["executions"].as_array().unwrap().is_empty());

    let audit = json_out(selfheal(&dir).args([
        "audit",
        "--org",
        "org-1",
        "--action",
        "pattern_detected",
    ]));
    assert_eq!(audit.as_array().unwrap().len(), 1);
}

#[test]
fn scan_auto_execute_runs_matching_action() {
    let dir = seeded_project();
    for entity in ["t-1", "t-2", "t-3"] {
        record_signal(&dir, "stalled_work", entity);
    }

    let report = json_out(selfheal(&dir).args(["scan", "--org", "org-1", "--auto-execute"]));
    let executions = report["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["execution"]["action_id"], "notify-leads");
    assert_eq!(executions[0]["execution"]["status"], "completed");

    let outbox = std::fs::read_to_string(dir.path().join(".selfheal/outbox/email.jsonl")).unwrap();
    assert!(outbox.contains("ada@example.com"));
    assert!(outbox.contains("Ada: Notify leads"));
}

// ---------------------------------------------------------------------------
// selfheal execute / executions / rollback
// ---------------------------------------------------------------------------

#[test]
fn execute_then_cooldown_blocks_second_run() {
    let dir = seeded_project();
    let first = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "notify-leads"]));
    assert_eq!(first["execution"]["status"], "completed");

    let second = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "notify-leads"]));
    assert_eq!(second["execution"]["status"], "blocked");
    assert!(second["execution"]["blocked_reason"]
        .as_str()
        .unwrap()
        .contains("cooldown"));

    let blocked = json_out(selfheal(&dir).args([
        "executions",
        "list",
        "--org",
        "org-1",
        "--status",
        "blocked",
    ]));
    assert_eq!(blocked.as_array().unwrap().len(), 1);
}

#[test]
fn dry_run_leaves_no_trace_outside_audit() {
    let dir = seeded_project();
    let out = json_out(selfheal(&dir).args([
        "execute",
        "--org",
        "org-1",
        "notify-leads",
        "--dry-run",
    ]));
    assert_eq!(out["execution"]["dry_run"], true);
    assert!(!dir.path().join(".selfheal/outbox/email.jsonl").exists());

    let summary = json_out(selfheal(&dir).args(["audit", "--org", "org-1", "--summary"]));
    assert!(summary["simulated"].as_u64().unwrap() > 0);

    // A dry run does not start the cooldown.
    let real = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "notify-leads"]));
    assert_eq!(real["execution"]["status"], "completed");
}

#[test]
fn execute_unknown_action_fails() {
    let dir = seeded_project();
    selfheal(&dir)
        .args(["execute", "--org", "org-1", "no-such-action"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("action not found"));
}

#[test]
fn redistribute_and_rollback_restore_workload() {
    let dir = seeded_project();
    let run = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "move-work"]));
    assert_eq!(run["execution"]["status"], "completed");
    let id = run["execution"]["id"].as_str().unwrap().to_string();

    let moved = std::fs::read_to_string(dir.path().join(".selfheal/workload.yaml")).unwrap();
    assert!(!moved.contains("assignee: u-1"));

    let shown = json_out(selfheal(&dir).args(["executions", "show", &id]));
    assert_eq!(shown["result"]["changes"].as_array().unwrap().len(), 2);

    let back = json_out(selfheal(&dir).args(["rollback", &id]));
    assert_eq!(back["execution"]["status"], "rolled_back");
    let restored = std::fs::read_to_string(dir.path().join(".selfheal/workload.yaml")).unwrap();
    assert!(!restored.contains("assignee: u-2"));
}

#[test]
fn rollback_of_notification_is_refused() {
    let dir = seeded_project();
    let run = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "notify-leads"]));
    let id = run["execution"]["id"].as_str().unwrap().to_string();

    selfheal(&dir)
        .args(["rollback", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rollback not supported"));
}

// ---------------------------------------------------------------------------
// selfheal approvals
// ---------------------------------------------------------------------------

#[test]
fn approval_required_action_waits_for_decision() {
    let dir = seeded_project();
    let gated = ACTIONS.replace(
        "    action_type: redistribute\n",
        "    action_type: redistribute\n    requires_approval: true\n",
    );
    std::fs::write(dir.path().join(".selfheal/actions.yaml"), gated).unwrap();

    let pending = json_out(selfheal(&dir).args(["execute", "--org", "org-1", "move-work"]));
    assert_eq!(pending["execution"]["status"], "awaiting_approval");
    let approval_id = pending["approval"]["id"].as_str().unwrap().to_string();

    let open = json_out(selfheal(&dir).args(["approvals", "list", "--org", "org-1"]));
    assert_eq!(open.as_array().unwrap().len(), 1);

    let approved = json_out(selfheal(&dir).args([
        "approvals",
        "approve",
        &approval_id,
        "--by",
        "grace",
    ]));
    assert_eq!(approved["execution"]["status"], "completed");

    let open = json_out(selfheal(&dir).args(["approvals", "list", "--org", "org-1"]));
    assert!(open.as_array().unwrap().is_empty());

    selfheal(&dir)
        .args(["approvals", "reject", &approval_id, "--by", "grace"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// selfheal jobs / run
// ---------------------------------------------------------------------------

#[test]
fn scheduled_jobs_run_once() {
    let dir = seeded_project();
    selfheal(&dir)
        .args(["jobs", "schedule", "execute", "--org", "org-1", "--action", "notify-leads"])
        .assert()
        .success();
    selfheal(&dir)
        .args(["jobs", "schedule", "approvals", "--org", "org-1", "--every", "300"])
        .assert()
        .success();

    let done = json_out(selfheal(&dir).args(["run", "--once"]));
    let done = done.as_array().unwrap();
    assert_eq!(done.len(), 2);
    assert!(done.iter().all(|d| d["report"]["success"] == true));

    // The recurring sweep queued its next occurrence.
    let pending = json_out(selfheal(&dir).args(["jobs", "list", "--pending"]));
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["job"]["kind"], "approval_maintenance");
}

#[test]
fn execute_job_requires_action() {
    let dir = seeded_project();
    selfheal(&dir)
        .args(["jobs", "schedule", "execute", "--org", "org-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--action"));
}

#[test]
fn learn_reports_empty_window() {
    let dir = seeded_project();
    let report = json_out(selfheal(&dir).args(["learn", "--org", "org-1"]));
    assert_eq!(report["executions_analyzed"], 0);
}
