//! The Safety Gate: admission control in front of every side effect.
//!
//! [`evaluate`] is a pure function of its [`GateInput`]. The caller gathers
//! counters and target availability, holds the organization lock while it
//! evaluates, and persists the reservation before releasing it.
//!
//! Checks always run in this order and all of them run, even after a failure:
//!
//! 1. `rate_limit`            error
//! 2. `concurrency_limit`     error
//! 3. `blast_radius`          warning
//! 4. `cooldown`              error
//! 5. `time_window`           error
//! 6. `approval_requirement`  info, routes to approval
//! 7. `configuration_validity` critical
//! 8. `target_availability`   error, warning when only some targets resolve

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::action::AutomatedAction;
use crate::config::{Environment, SafetyPolicy};
use crate::executor::ExecutorRegistry;
use crate::pattern::DetectedPattern;
use crate::types::TargetRef;

pub const RATE_LIMIT: &str = "rate_limit";
pub const CONCURRENCY_LIMIT: &str = "concurrency_limit";
pub const BLAST_RADIUS: &str = "blast_radius";
pub const COOLDOWN: &str = "cooldown";
pub const TIME_WINDOW: &str = "time_window";
pub const APPROVAL_REQUIREMENT: &str = "approval_requirement";
pub const CONFIGURATION_VALIDITY: &str = "configuration_validity";
pub const TARGET_AVAILABILITY: &str = "target_availability";

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl CheckSeverity {
    pub fn blocks(self) -> bool {
        matches!(self, CheckSeverity::Error | CheckSeverity::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub name: String,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub passed: bool,
    pub checks: Vec<SafetyCheck>,
    /// Message of the first failing error/critical check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_check: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

impl SafetyCheckResult {
    pub fn check(&self, name: &str) -> Option<&SafetyCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Organization-scoped counters, read under the organization lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateCounters {
    /// Non-dry-run executions started in the trailing hour.
    pub executions_last_hour: u32,
    /// Executions currently in `executing`.
    pub executing: u32,
    /// Most recent start of this action with status completed or executing.
    pub last_run_of_action: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target: TargetRef,
    pub available: usize,
    pub total: usize,
}

pub struct GateInput<'a> {
    pub action: &'a AutomatedAction,
    pub pattern: Option<&'a DetectedPattern>,
    pub policy: &'a SafetyPolicy,
    pub environment: Environment,
    pub counters: GateCounters,
    pub targets: Vec<TargetStatus>,
    /// A human already approved this execution.
    pub approval_granted: bool,
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn evaluate(input: &GateInput<'_>, registry: &ExecutorRegistry) -> SafetyCheckResult {
    let (requires_approval, approval) = check_approval(input);
    let checks = vec![
        check_rate_limit(input),
        check_concurrency(input),
        check_blast_radius(input),
        check_cooldown(input),
        check_time_window(input),
        approval,
        check_configuration(input, registry),
        check_targets(input),
    ];

    let first_block = checks.iter().find(|c| !c.passed && c.severity.blocks());
    let warnings = checks
        .iter()
        .filter(|c| !c.passed && c.severity == CheckSeverity::Warning)
        .map(|c| c.message.clone())
        .collect();

    SafetyCheckResult {
        passed: first_block.is_none(),
        blocked_reason: first_block.map(|c| c.message.clone()),
        blocked_check: first_block.map(|c| c.name.clone()),
        warnings,
        requires_approval,
        checks,
    }
}

fn check(name: &str, passed: bool, severity: CheckSeverity, message: String) -> SafetyCheck {
    SafetyCheck {
        name: name.to_string(),
        passed,
        severity,
        message,
    }
}

fn check_rate_limit(input: &GateInput<'_>) -> SafetyCheck {
    let n = input.counters.executions_last_hour;
    let max = input.policy.max_actions_per_hour;
    if n < max {
        check(
            RATE_LIMIT,
            true,
            CheckSeverity::Error,
            format!("{n} of {max} hourly executions used"),
        )
    } else {
        check(
            RATE_LIMIT,
            false,
            CheckSeverity::Error,
            format!("rate limit reached: {n} executions in the last hour (max {max})"),
        )
    }
}

fn check_concurrency(input: &GateInput<'_>) -> SafetyCheck {
    let n = input.counters.executing;
    let max = input.policy.max_concurrent_executions;
    if n < max {
        check(
            CONCURRENCY_LIMIT,
            true,
            CheckSeverity::Error,
            format!("{n} of {max} concurrent executions running"),
        )
    } else {
        check(
            CONCURRENCY_LIMIT,
            false,
            CheckSeverity::Error,
            format!("concurrent execution limit reached: {n} executing (max {max})"),
        )
    }
}

fn check_blast_radius(input: &GateInput<'_>) -> SafetyCheck {
    let n = input.pattern.map(|p| p.affected_entities.len()).unwrap_or(0);
    let max = input.policy.max_affected_entities;
    if n <= max {
        check(
            BLAST_RADIUS,
            true,
            CheckSeverity::Warning,
            format!("{n} affected entities (max {max})"),
        )
    } else {
        check(
            BLAST_RADIUS,
            false,
            CheckSeverity::Warning,
            format!("blast radius {n} exceeds max {max} affected entities"),
        )
    }
}

fn check_cooldown(input: &GateInput<'_>) -> SafetyCheck {
    let min = i64::from(input.policy.min_action_cooldown_minutes);
    match input.counters.last_run_of_action {
        Some(last) => {
            let elapsed = (input.now - last).num_minutes();
            if elapsed >= min {
                check(
                    COOLDOWN,
                    true,
                    CheckSeverity::Error,
                    format!("last run {elapsed} minutes ago (cooldown {min})"),
                )
            } else {
                check(
                    COOLDOWN,
                    false,
                    CheckSeverity::Error,
                    format!(
                        "cooldown active: action '{}' ran {elapsed} minutes ago (min {min})",
                        input.action.id
                    ),
                )
            }
        }
        None => check(
            COOLDOWN,
            true,
            CheckSeverity::Error,
            "no recent execution".to_string(),
        ),
    }
}

fn check_time_window(input: &GateInput<'_>) -> SafetyCheck {
    let hour = input.now.hour();
    let weekday = input.now.weekday();
    if input.policy.blocked_hours.contains(&hour) {
        check(
            TIME_WINDOW,
            false,
            CheckSeverity::Error,
            format!("blocked time window: hour {hour:02}:00 UTC"),
        )
    } else if input.policy.blocked_weekdays.contains(&weekday) {
        check(
            TIME_WINDOW,
            false,
            CheckSeverity::Error,
            format!("blocked time window: {weekday} (UTC)"),
        )
    } else {
        check(
            TIME_WINDOW,
            true,
            CheckSeverity::Error,
            format!("{weekday} {hour:02}:00 UTC is allowed"),
        )
    }
}

fn check_approval(input: &GateInput<'_>) -> (bool, SafetyCheck) {
    let mut reasons = Vec::new();
    if input.action.requires_approval {
        reasons.push("action is configured to require approval".to_string());
    }
    if input
        .policy
        .approval_required_kinds
        .contains(&input.action.action_type)
    {
        reasons.push(format!(
            "{} actions require approval",
            input.action.action_type
        ));
    }
    if let (Some(threshold), Some(pattern)) = (input.policy.approval_severity_threshold, input.pattern)
    {
        if pattern.severity >= threshold {
            reasons.push(format!(
                "pattern severity {} is at or above {threshold}",
                pattern.severity
            ));
        }
    }

    let message = if reasons.is_empty() {
        "no approval required".to_string()
    } else if input.approval_granted {
        format!("approved ({})", reasons.join("; "))
    } else {
        format!("approval required: {}", reasons.join("; "))
    };
    let required = !reasons.is_empty() && !input.approval_granted;
    (
        required,
        check(APPROVAL_REQUIREMENT, true, CheckSeverity::Info, message),
    )
}

fn check_configuration(input: &GateInput<'_>, registry: &ExecutorRegistry) -> SafetyCheck {
    let report = registry.validate(input.action, input.environment);
    if report.valid {
        check(
            CONFIGURATION_VALIDITY,
            true,
            CheckSeverity::Critical,
            format!("{} configuration is valid", input.action.action_type),
        )
    } else {
        check(
            CONFIGURATION_VALIDITY,
            false,
            CheckSeverity::Critical,
            format!("invalid configuration: {}", report.errors.join("; ")),
        )
    }
}

fn check_targets(input: &GateInput<'_>) -> SafetyCheck {
    if input.targets.is_empty() {
        return check(
            TARGET_AVAILABILITY,
            true,
            CheckSeverity::Error,
            "action names no specific target".to_string(),
        );
    }
    let available: usize = input.targets.iter().map(|t| t.available).sum();
    let unreachable: Vec<String> = input
        .targets
        .iter()
        .filter(|t| t.available == 0)
        .map(|t| t.target.to_string())
        .collect();

    if available == 0 {
        check(
            TARGET_AVAILABILITY,
            false,
            CheckSeverity::Error,
            format!("no available recipient for {}", unreachable.join(", ")),
        )
    } else if !unreachable.is_empty() {
        check(
            TARGET_AVAILABILITY,
            false,
            CheckSeverity::Warning,
            format!(
                "target unavailable: {} (proceeding with {available} available recipients)",
                unreachable.join(", ")
            ),
        )
    } else {
        check(
            TARGET_AVAILABILITY,
            true,
            CheckSeverity::Error,
            format!("{available} recipients available"),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
