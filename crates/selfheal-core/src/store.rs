//! Persistent engine state in a single redb database.
//!
//! # Table design
//!
//! Every value is JSON. Keys:
//!
//! | table        | key                                              |
//! |--------------|--------------------------------------------------|
//! | `executions` | execution uuid (16 bytes)                        |
//! | `patterns`   | pattern uuid (16 bytes)                          |
//! | `approvals`  | approval uuid (16 bytes)                         |
//! | `audit`      | `timestamp_ms` BE (8) ++ sequence BE (8) ++ uuid[..8] |
//! | `reminders`  | `"<action_id>|<pattern_id or 'none'>"`           |
//! | `mappings`   | `"<org>|<pattern_type>|<action_id>"`             |
//!
//! The audit key puts the timestamp in the high bytes so a range scan from a
//! lower bound returns entries in write order; the sequence keeps entries
//! written in the same millisecond ordered.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::approval::{ApprovalRequest, ApprovalStatus};
use crate::audit::AuditEntry;
use crate::error::{HealError, Result};
use crate::execution::{ActionExecution, ExecutionStatus};
use crate::executor::reminder::ReminderState;
use crate::learning::PatternActionMapping;
use crate::pattern::DetectedPattern;
use crate::safety::GateCounters;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

const EXECUTIONS: Table = TableDefinition::new("executions");
const PATTERNS: Table = TableDefinition::new("patterns");
const APPROVALS: Table = TableDefinition::new("approvals");
const AUDIT: Table = TableDefinition::new("audit");
const REMINDERS: Table = TableDefinition::new("reminders");
const MAPPINGS: Table = TableDefinition::new("mappings");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn audit_key(ts: DateTime<Utc>, seq: u64, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..16].copy_from_slice(&seq.to_be_bytes());
    key[16..].copy_from_slice(&id.as_bytes()[..8]);
    key
}

/// Lowest possible audit key at `since`.
fn audit_lower_bound(since: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = since.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key
}

fn reminder_key(action_id: &str, pattern_id: Option<Uuid>) -> String {
    match pattern_id {
        Some(p) => format!("{action_id}|{p}"),
        None => format!("{action_id}|none"),
    }
}

fn mapping_key(m: &PatternActionMapping) -> String {
    format!("{}|{}|{}", m.organization_id, m.pattern_type, m.action_id)
}

// ---------------------------------------------------------------------------
// EngineDb
// ---------------------------------------------------------------------------

pub struct EngineDb {
    db: Database,
    audit_seq: AtomicU64,
}

impl EngineDb {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(HealError::store)?;
        let wt = db.begin_write().map_err(HealError::store)?;
        for table in [EXECUTIONS, PATTERNS, APPROVALS, AUDIT, REMINDERS, MAPPINGS] {
            wt.open_table(table).map_err(HealError::store)?;
        }
        wt.commit().map_err(HealError::store)?;
        Ok(Self {
            db,
            audit_seq: AtomicU64::new(0),
        })
    }

    // -----------------------------------------------------------------------
    // Generic helpers
    // -----------------------------------------------------------------------

    fn put<T: Serialize>(&self, table: Table, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(HealError::store)?;
        {
            let mut t = wt.open_table(table).map_err(HealError::store)?;
            t.insert(key, bytes.as_slice()).map_err(HealError::store)?;
        }
        wt.commit().map_err(HealError::store)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(HealError::store)?;
        let t = rt.open_table(table).map_err(HealError::store)?;
        match t.get(key).map_err(HealError::store)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        let rt = self.db.begin_read().map_err(HealError::store)?;
        let t = rt.open_table(table).map_err(HealError::store)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(HealError::store)? {
            let (_, v) = entry.map_err(HealError::store)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    pub fn put_execution(&self, execution: &ActionExecution) -> Result<()> {
        self.put(EXECUTIONS, execution.id.as_bytes(), execution)
    }

    pub fn get_execution(&self, id: Uuid) -> Result<ActionExecution> {
        self.get(EXECUTIONS, id.as_bytes())?
            .ok_or_else(|| HealError::ExecutionNotFound(id.to_string()))
    }

    /// Executions for one organization (or all), newest first.
    pub fn list_executions(&self, organization_id: Option<&str>) -> Result<Vec<ActionExecution>> {
        let mut all: Vec<ActionExecution> = self.scan(EXECUTIONS)?;
        if let Some(org) = organization_id {
            all.retain(|e| e.organization_id == org);
        }
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all)
    }

    /// Counters the Safety Gate reads. Dry runs never count.
    pub fn gate_counters(
        &self,
        organization_id: &str,
        action_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GateCounters> {
        let hour_ago = now - chrono::Duration::hours(1);
        let mut counters = GateCounters::default();
        for e in self.list_executions(Some(organization_id))? {
            if e.dry_run {
                continue;
            }
            let started = matches!(
                e.status,
                ExecutionStatus::Executing
                    | ExecutionStatus::Completed
                    | ExecutionStatus::Failed
                    | ExecutionStatus::RolledBack
            );
            let ran_at = e.run_started_at();
            if started && ran_at > hour_ago {
                counters.executions_last_hour += 1;
            }
            if e.status == ExecutionStatus::Executing {
                counters.executing += 1;
            }
            if e.action_id == action_id
                && matches!(
                    e.status,
                    ExecutionStatus::Completed | ExecutionStatus::Executing
                )
            {
                counters.last_run_of_action = Some(match counters.last_run_of_action {
                    Some(prev) if prev > ran_at => prev,
                    _ => ran_at,
                });
            }
        }
        Ok(counters)
    }

    /// Executions left `executing` for longer than `max_age`, as of `now`.
    pub fn stale_executions(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionExecution>> {
        let cutoff = now - chrono::Duration::from_std(max_age).map_err(HealError::store)?;
        Ok(self
            .list_executions(None)?
            .into_iter()
            .filter(|e| e.status == ExecutionStatus::Executing && e.updated_at < cutoff)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    pub fn put_pattern(&self, pattern: &DetectedPattern) -> Result<()> {
        self.put(PATTERNS, pattern.id.as_bytes(), pattern)
    }

    pub fn get_pattern(&self, id: Uuid) -> Result<DetectedPattern> {
        self.get(PATTERNS, id.as_bytes())?
            .ok_or_else(|| HealError::PatternNotFound(id.to_string()))
    }

    pub fn list_patterns(&self, organization_id: &str) -> Result<Vec<DetectedPattern>> {
        let mut all: Vec<DetectedPattern> = self.scan(PATTERNS)?;
        all.retain(|p| p.organization_id == organization_id);
        all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(all)
    }

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    pub fn put_approval(&self, request: &ApprovalRequest) -> Result<()> {
        self.put(APPROVALS, request.id.as_bytes(), request)
    }

    /// Store an execution now awaiting approval together with its request,
    /// in one write transaction.
    pub fn put_awaiting_approval(
        &self,
        execution: &ActionExecution,
        request: &ApprovalRequest,
    ) -> Result<()> {
        let execution_bytes = serde_json::to_vec(execution)?;
        let request_bytes = serde_json::to_vec(request)?;
        let wt = self.db.begin_write().map_err(HealError::store)?;
        {
            let mut t = wt.open_table(EXECUTIONS).map_err(HealError::store)?;
            t.insert(execution.id.as_bytes().as_slice(), execution_bytes.as_slice())
                .map_err(HealError::store)?;
            let mut t = wt.open_table(APPROVALS).map_err(HealError::store)?;
            t.insert(request.id.as_bytes().as_slice(), request_bytes.as_slice())
                .map_err(HealError::store)?;
        }
        wt.commit().map_err(HealError::store)?;
        Ok(())
    }

    pub fn get_approval(&self, id: Uuid) -> Result<ApprovalRequest> {
        self.get(APPROVALS, id.as_bytes())?
            .ok_or_else(|| HealError::ApprovalNotFound(id.to_string()))
    }

    pub fn list_approvals(&self, organization_id: Option<&str>) -> Result<Vec<ApprovalRequest>> {
        let mut all: Vec<ApprovalRequest> = self.scan(APPROVALS)?;
        if let Some(org) = organization_id {
            all.retain(|a| a.organization_id == org);
        }
        all.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(all)
    }

    /// Requests still open (pending or escalated), oldest first.
    pub fn open_approvals(&self, organization_id: &str) -> Result<Vec<ApprovalRequest>> {
        let mut open: Vec<ApprovalRequest> = self
            .list_approvals(Some(organization_id))?
            .into_iter()
            .filter(|a| matches!(a.status, ApprovalStatus::Pending | ApprovalStatus::Escalated))
            .collect();
        open.reverse();
        Ok(open)
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let seq = self.audit_seq.fetch_add(1, Ordering::SeqCst);
        let key = audit_key(entry.created_at, seq, entry.id);
        self.put(AUDIT, key.as_slice(), entry)
    }

    /// Entries at or after `since` (all if `None`), in write order.
    pub fn audit_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEntry>> {
        let lower = since.map(audit_lower_bound).unwrap_or([0u8; 24]);
        let rt = self.db.begin_read().map_err(HealError::store)?;
        let t = rt.open_table(AUDIT).map_err(HealError::store)?;
        let mut out = Vec::new();
        for entry in t.range(lower.as_slice()..).map_err(HealError::store)? {
            let (_, v) = entry.map_err(HealError::store)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Reminder state
    // -----------------------------------------------------------------------

    pub fn reminder_state(
        &self,
        action_id: &str,
        pattern_id: Option<Uuid>,
    ) -> Result<Option<ReminderState>> {
        self.get(REMINDERS, reminder_key(action_id, pattern_id).as_bytes())
    }

    pub fn put_reminder_state(
        &self,
        action_id: &str,
        pattern_id: Option<Uuid>,
        state: &ReminderState,
    ) -> Result<()> {
        self.put(
            REMINDERS,
            reminder_key(action_id, pattern_id).as_bytes(),
            state,
        )
    }

    // -----------------------------------------------------------------------
    // Pattern → action mappings
    // -----------------------------------------------------------------------

    pub fn mappings(&self, organization_id: &str) -> Result<Vec<PatternActionMapping>> {
        let mut all: Vec<PatternActionMapping> = self.scan(MAPPINGS)?;
        all.retain(|m| m.organization_id == organization_id);
        Ok(all)
    }

    pub fn put_mapping(&self, mapping: &PatternActionMapping) -> Result<()> {
        self.put(MAPPINGS, mapping_key(mapping).as_bytes(), mapping)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
