//! Job data model for the persistent queue.
//!
//! A `ScheduledJob` pairs a trigger (when it becomes due) with one of the
//! engine's four operation types. The tick loop queries `JobQueue` for due
//! jobs and hands each to the `JobRunner`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The work itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    PatternScan {
        organization_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern_types: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_window_minutes: Option<u32>,
        #[serde(default)]
        auto_execute: bool,
    },
    ActionExecution {
        organization_id: String,
        action_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern_id: Option<Uuid>,
        #[serde(default)]
        dry_run: bool,
    },
    ApprovalMaintenance {
        organization_id: String,
    },
    LearningAnalysis {
        organization_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis_window_days: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PatternScan,
    ActionExecution,
    ApprovalMaintenance,
    LearningAnalysis,
}

impl JobKind {
    pub fn all() -> &'static [JobKind] {
        &[
            JobKind::PatternScan,
            JobKind::ActionExecution,
            JobKind::ApprovalMaintenance,
            JobKind::LearningAnalysis,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::PatternScan => "pattern_scan",
            JobKind::ActionExecution => "action_execution",
            JobKind::ApprovalMaintenance => "approval_maintenance",
            JobKind::LearningAnalysis => "learning_analysis",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::PatternScan { .. } => JobKind::PatternScan,
            Job::ActionExecution { .. } => JobKind::ActionExecution,
            Job::ApprovalMaintenance { .. } => JobKind::ApprovalMaintenance,
            Job::LearningAnalysis { .. } => JobKind::LearningAnalysis,
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            Job::PatternScan {
                organization_id, ..
            }
            | Job::ActionExecution {
                organization_id, ..
            }
            | Job::ApprovalMaintenance { organization_id }
            | Job::LearningAnalysis {
                organization_id, ..
            } => organization_id,
        }
    }
}

// ---------------------------------------------------------------------------
// JobTrigger
// ---------------------------------------------------------------------------

/// Determines when a job becomes due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTrigger {
    /// Fires when the tick loop runs at or after `next_tick_at`.
    Scheduled { next_tick_at: DateTime<Utc> },
}

impl JobTrigger {
    /// The timestamp used as the redb key prefix.
    pub fn key_ts(&self) -> DateTime<Utc> {
        match self {
            Self::Scheduled { next_tick_at } => *next_tick_at,
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// `Pending → Running → Completed | Failed`
///
/// The tick loop writes `Running` before dispatching. On restart, a job stuck
/// in `Running` is recovered to `Failed` by `startup_recovery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed { result: serde_json::Value },
    Failed { reason: String },
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduledJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    /// Human-readable label (e.g. "nightly-scan").
    pub label: String,
    pub job: Job,
    pub trigger: JobTrigger,
    pub status: JobStatus,
    /// Attempts the runner made on the last dispatch.
    #[serde(default)]
    pub attempts: u32,
    /// If set, a new `Pending` job is queued after each run with
    /// `next_tick_at = now + recurrence`.
    #[serde(
        serialize_with = "serialize_duration_opt",
        deserialize_with = "deserialize_duration_opt",
        default
    )]
    pub recurrence: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Create a new scheduled job in `Pending` state.
    pub fn new_scheduled(
        label: impl Into<String>,
        job: Job,
        next_tick_at: DateTime<Utc>,
        recurrence: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            job,
            trigger: JobTrigger::Scheduled { next_tick_at },
            status: JobStatus::Pending,
            attempts: 0,
            recurrence,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

fn serialize_duration_opt<S>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match d {
        Some(dur) => s.serialize_some(&dur.as_secs()),
        None => s.serialize_none(),
    }
}

fn deserialize_duration_opt<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<u64> = Option::deserialize(d)?;
    Ok(opt.map(Duration::from_secs))
}
