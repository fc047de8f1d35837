//! `ActionExecution`: the one mutable entity of the engine, and its lifecycle.
//!
//! ```text
//! created → gating → blocked
//!                  → awaiting_approval → executing | blocked
//!                  → executing → completed → [rolled_back]
//!                              → failed
//! ```
//!
//! Every status change goes through [`ActionExecution::transition`], which
//! rejects edges not in the diagram above.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HealError, Result};
use crate::safety::SafetyCheckResult;
use crate::types::{ActionKind, TriggeredBy};

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Gating,
    Blocked,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Created => "created",
            ExecutionStatus::Gating => "gating",
            ExecutionStatus::Blocked => "blocked",
            ExecutionStatus::AwaitingApproval => "awaiting_approval",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Created, Gating)
                | (Gating, Blocked)
                | (Gating, AwaitingApproval)
                | (Gating, Executing)
                | (AwaitingApproval, Executing)
                | (AwaitingApproval, Blocked)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, RolledBack)
        )
    }

    /// No further transition is possible except an explicit rollback.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Blocked
                | ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::RolledBack
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = HealError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use ExecutionStatus::*;
        [
            Created,
            Gating,
            Blocked,
            AwaitingApproval,
            Executing,
            Completed,
            Failed,
            RolledBack,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
        .ok_or_else(|| HealError::Configuration(format!("unknown execution status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Change / RollbackData / ExecutionOutcome
// ---------------------------------------------------------------------------

/// One side effect actually performed against the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub entity_type: String,
    pub entity_id: String,
    pub change_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

/// What an executor captured at completion to undo itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackData {
    Reassignment {
        from_assignee: String,
        to_assignee: String,
        items: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub affected_entities: Vec<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackData>,
    /// When the executor wants to run again (reminder repeats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ExecutionOutcome {
    pub fn succeeded(changes: Vec<Change>) -> Self {
        let mut affected: Vec<String> = changes.iter().map(|c| c.entity_id.clone()).collect();
        affected.sort();
        affected.dedup();
        Self {
            success: true,
            affected_entities: affected,
            changes,
            ..Default::default()
        }
    }

    pub fn failed(changes: Vec<Change>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            ..Self::succeeded(changes)
        }
    }

    pub fn metric(mut self, key: &str, value: u64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// ActionExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: Uuid,
    pub action_id: String,
    pub organization_id: String,
    pub action_type: ActionKind,
    pub triggered_by: TriggeredBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    /// When the execution entered `executing`, which for approved
    /// executions is later than `started_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executing_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<SafetyCheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<Uuid>,
    #[serde(default)]
    pub dry_run: bool,
    pub updated_at: DateTime<Utc>,
}

impl ActionExecution {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Option<Uuid>,
        action_id: &str,
        organization_id: &str,
        action_type: ActionKind,
        triggered_by: TriggeredBy,
        pattern_id: Option<Uuid>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(Uuid::new_v4),
            action_id: action_id.to_string(),
            organization_id: organization_id.to_string(),
            action_type,
            triggered_by,
            pattern_id,
            status: ExecutionStatus::Created,
            started_at: now,
            executing_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            rollback_data: None,
            blocked_reason: None,
            gate: None,
            approval_id: None,
            dry_run,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: ExecutionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(HealError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
                reason: format!("execution {}", self.id),
            });
        }
        tracing::debug!(execution = %self.id, from = %self.status, to = %next, "execution transition");
        self.status = next;
        self.updated_at = now;
        if next == ExecutionStatus::Executing {
            self.executing_at = Some(now);
        }
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn block(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(ExecutionStatus::Blocked, now)?;
        self.blocked_reason = Some(reason.into());
        Ok(())
    }

    /// Record the executor's outcome and move to completed or failed.
    pub fn finish(&mut self, outcome: ExecutionOutcome, now: DateTime<Utc>) -> Result<()> {
        let next = if outcome.success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.transition(next, now)?;
        self.error_message = outcome.error_message.clone();
        self.rollback_data = outcome.rollback_data.clone();
        self.result = Some(outcome);
        Ok(())
    }

    /// When the side effects began, for rate and cooldown accounting.
    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.executing_at.unwrap_or(self.started_at)
    }

    /// Changes recorded by the executor, empty before a result exists.
    pub fn changes(&self) -> &[Change] {
        self.result
            .as_ref()
            .map(|r| r.changes.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> ActionExecution {
        ActionExecution::new(
            None,
            "a1",
            "org-1",
            ActionKind::Reminder,
            TriggeredBy::Manual,
            None,
            false,
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut e = exec();
        let now = Utc::now();
        e.transition(ExecutionStatus::Gating, now).unwrap();
        e.transition(ExecutionStatus::Executing, now).unwrap();
        e.finish(ExecutionOutcome::succeeded(vec![]), now).unwrap();
        assert_eq!(e.status, ExecutionStatus::Completed);
        assert_eq!(e.completed_at, Some(now));
        e.transition(ExecutionStatus::RolledBack, now).unwrap();
    }

    #[test]
    fn illegal_edges_are_rejected() {
        let mut e = exec();
        let now = Utc::now();
        let err = e.transition(ExecutionStatus::Executing, now).unwrap_err();
        assert!(matches!(err, HealError::InvalidTransition { .. }));

        e.transition(ExecutionStatus::Gating, now).unwrap();
        e.block("rate limit", now).unwrap();
        assert!(e.transition(ExecutionStatus::Executing, now).is_err());
        assert_eq!(e.blocked_reason.as_deref(), Some("rate limit"));
    }

    #[test]
    fn approved_execution_runs_from_approval_time() {
        let mut e = exec();
        let requested = e.started_at;
        let approved = requested + chrono::Duration::hours(2);
        e.transition(ExecutionStatus::Gating, requested).unwrap();
        e.transition(ExecutionStatus::AwaitingApproval, requested).unwrap();
        assert_eq!(e.run_started_at(), requested);
        e.transition(ExecutionStatus::Executing, approved).unwrap();
        assert_eq!(e.executing_at, Some(approved));
        assert_eq!(e.run_started_at(), approved);
    }

    #[test]
    fn failed_cannot_roll_back() {
        assert!(!ExecutionStatus::Failed.can_transition_to(ExecutionStatus::RolledBack));
        assert!(!ExecutionStatus::Blocked.can_transition_to(ExecutionStatus::RolledBack));
    }

    #[test]
    fn failed_outcome_keeps_partial_changes() {
        let change = Change {
            entity_type: "recipient".into(),
            entity_id: "u-1".into(),
            change_type: "message_sent".into(),
            before: None,
            after: None,
        };
        let mut e = exec();
        let now = Utc::now();
        e.transition(ExecutionStatus::Gating, now).unwrap();
        e.transition(ExecutionStatus::Executing, now).unwrap();
        e.finish(ExecutionOutcome::failed(vec![change], "smtp down"), now)
            .unwrap();
        assert_eq!(e.status, ExecutionStatus::Failed);
        assert_eq!(e.changes().len(), 1);
        assert_eq!(e.error_message.as_deref(), Some("smtp down"));
    }

    #[test]
    fn status_parses_snake_case() {
        assert_eq!(
            "awaiting_approval".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::AwaitingApproval
        );
    }
}
