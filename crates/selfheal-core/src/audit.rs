//! Append-only audit trail.
//!
//! `record` writes synchronously to the engine database and returns only
//! after the commit. Callers record before they perform the side effect the
//! entry describes, so the trail is always a superset of real-world effects.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HealError, Result};
use crate::store::EngineDb;

// ---------------------------------------------------------------------------
// AuditAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PatternDetected,
    SafetyPass,
    SafetyBlock,
    ActionTriggered,
    /// A side effect is about to be performed.
    ActionExecuted,
    ActionCompleted,
    ActionFailed,
    ActionRolledBack,
    ApprovalRequested,
    ApprovalEscalated,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalExpired,
    MappingsUpdated,
    ExecutionRecovered,
}

impl AuditAction {
    pub fn all() -> &'static [AuditAction] {
        use AuditAction::*;
        &[
            PatternDetected,
            SafetyPass,
            SafetyBlock,
            ActionTriggered,
            ActionExecuted,
            ActionCompleted,
            ActionFailed,
            ActionRolledBack,
            ApprovalRequested,
            ApprovalEscalated,
            ApprovalGranted,
            ApprovalRejected,
            ApprovalExpired,
            MappingsUpdated,
            ExecutionRecovered,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::PatternDetected => "pattern_detected",
            AuditAction::SafetyPass => "safety_pass",
            AuditAction::SafetyBlock => "safety_block",
            AuditAction::ActionTriggered => "action_triggered",
            AuditAction::ActionExecuted => "action_executed",
            AuditAction::ActionCompleted => "action_completed",
            AuditAction::ActionFailed => "action_failed",
            AuditAction::ActionRolledBack => "action_rolled_back",
            AuditAction::ApprovalRequested => "approval_requested",
            AuditAction::ApprovalEscalated => "approval_escalated",
            AuditAction::ApprovalGranted => "approval_granted",
            AuditAction::ApprovalRejected => "approval_rejected",
            AuditAction::ApprovalExpired => "approval_expired",
            AuditAction::MappingsUpdated => "mappings_updated",
            AuditAction::ExecutionRecovered => "execution_recovered",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = HealError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AuditAction::all()
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| HealError::Configuration(format!("unknown audit action '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub performed_by: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub organization_id: String,
    /// Written by a dry run; no real-world effect followed.
    #[serde(default)]
    pub simulated: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: &str,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        performed_by: &str,
        details: serde_json::Value,
        simulated: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            performed_by: performed_by.to_string(),
            details,
            organization_id: organization_id.to_string(),
            simulated,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Query surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, e: &AuditEntry) -> bool {
        self.action.map_or(true, |a| a == e.action)
            && self
                .entity_type
                .as_deref()
                .map_or(true, |t| t == e.entity_type)
            && self.entity_id.as_deref().map_or(true, |id| id == e.entity_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: u64,
    pub simulated: u64,
    pub by_action: BTreeMap<AuditAction, u64>,
    pub by_entity_type: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// AuditTrail
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AuditTrail {
    db: Arc<EngineDb>,
}

impl AuditTrail {
    pub fn new(db: Arc<EngineDb>) -> Self {
        Self { db }
    }

    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.db.append_audit(entry)?;
        tracing::debug!(
            organization = %entry.organization_id,
            action = %entry.action,
            entity = %format_args!("{}:{}", entry.entity_type, entry.entity_id),
            simulated = entry.simulated,
            "audit recorded"
        );
        Ok(())
    }

    /// Build and record an entry stamped with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        organization_id: &str,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        performed_by: &str,
        details: serde_json::Value,
        simulated: bool,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry::new(
            organization_id,
            action,
            entity_type,
            entity_id,
            performed_by,
            details,
            simulated,
            Utc::now(),
        );
        self.record(&entry)?;
        Ok(entry)
    }

    /// Matching entries for the organization, oldest first.
    pub fn query(&self, organization_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut out: Vec<AuditEntry> = self
            .db
            .audit_since(filter.since)?
            .into_iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .collect();
        if let Some(limit) = filter.limit {
            let skip = out.len().saturating_sub(limit);
            out.drain(..skip);
        }
        Ok(out)
    }

    pub fn summary(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<AuditSummary> {
        let mut summary = AuditSummary::default();
        for e in self.db.audit_since(since)? {
            if e.organization_id != organization_id {
                continue;
            }
            summary.total += 1;
            if e.simulated {
                summary.simulated += 1;
            }
            *summary.by_action.entry(e.action).or_default() += 1;
            *summary.by_entity_type.entry(e.entity_type).or_default() += 1;
        }
        Ok(summary)
    }
}
