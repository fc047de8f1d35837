//! Runs jobs against the engine with per-kind concurrency caps and
//! exponential-backoff retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::db::JobQueue;
use super::job::{Job, JobKind, JobStatus, ScheduledJob};
use crate::config::JobPolicy;
use crate::engine::{Engine, ExecuteRequest, ScanRequest};
use crate::error::{HealError, Result};
use crate::execution::ExecutionStatus;
use crate::types::TriggeredBy;

/// Result of one job run, across all of its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub kind: JobKind,
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The executor asked to run again at this time (reminder repeats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_at: Option<DateTime<Utc>>,
}

/// Delay before retry `attempt` (1-based retry count): `base * 2^(attempt-1)`,
/// capped at `max_backoff_ms`.
pub fn backoff_delay(policy: &JobPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let ms = policy
        .base_backoff_ms
        .saturating_mul(1u64 << exp)
        .min(policy.max_backoff_ms);
    Duration::from_millis(ms)
}

fn with_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms < 4 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=ms / 4))
}

struct Dispatched {
    output: serde_json::Value,
    follow_up_at: Option<DateTime<Utc>>,
}

pub struct JobRunner {
    engine: Arc<Engine>,
    policy: JobPolicy,
    limits: HashMap<JobKind, Arc<Semaphore>>,
}

impl JobRunner {
    pub fn new(engine: Arc<Engine>) -> Self {
        let policy = engine.config().jobs.clone();
        let cap = |kind: JobKind| match kind {
            JobKind::PatternScan => policy.concurrency.pattern_scan,
            JobKind::ActionExecution => policy.concurrency.action_execution,
            JobKind::ApprovalMaintenance => policy.concurrency.approval_maintenance,
            JobKind::LearningAnalysis => policy.concurrency.learning_analysis,
        };
        let limits = JobKind::all()
            .iter()
            .map(|&k| (k, Arc::new(Semaphore::new(cap(k).max(1)))))
            .collect();
        Self {
            engine,
            policy,
            limits,
        }
    }

    /// Run one job to a definitive result.
    ///
    /// Retryable errors are retried up to `max_attempts` in total; anything
    /// else ends the run at once.
    pub async fn run(&self, job: &Job) -> JobReport {
        let kind = job.kind();
        let start = Instant::now();
        let _permit = match self.limits.get(&kind) {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(p) => Some(p),
                Err(_) => {
                    return self.report(kind, start, 0, Err(HealError::Configuration(
                        "job runner is shutting down".into(),
                    )))
                }
            },
            None => None,
        };

        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.dispatch(job, attempt).await;
            match result {
                Err(e) if e.is_retryable() && attempt < max => {
                    let delay = with_jitter(backoff_delay(&self.policy, attempt));
                    tracing::warn!(
                        kind = %kind,
                        organization = %job.organization_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "job attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return self.report(kind, start, attempt, other),
            }
        }
    }

    fn report(
        &self,
        kind: JobKind,
        start: Instant,
        attempts: u32,
        result: Result<Dispatched>,
    ) -> JobReport {
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(d) => {
                tracing::info!(kind = %kind, attempts, duration_ms, "job completed");
                JobReport {
                    kind,
                    success: true,
                    attempts,
                    duration_ms,
                    completed_at: Utc::now(),
                    output: Some(d.output),
                    error: None,
                    follow_up_at: d.follow_up_at,
                }
            }
            Err(e) => {
                tracing::error!(kind = %kind, attempts, duration_ms, error = %e, "job failed");
                JobReport {
                    kind,
                    success: false,
                    attempts,
                    duration_ms,
                    completed_at: Utc::now(),
                    output: None,
                    error: Some(e.to_string()),
                    follow_up_at: None,
                }
            }
        }
    }

    async fn dispatch(&self, job: &Job, attempt: u32) -> Result<Dispatched> {
        let plain = |output: serde_json::Value| Dispatched {
            output,
            follow_up_at: None,
        };
        match job {
            Job::PatternScan {
                organization_id,
                pattern_types,
                time_window_minutes,
                auto_execute,
            } => {
                let report = self
                    .engine
                    .scan(ScanRequest {
                        organization_id: organization_id.clone(),
                        pattern_types: pattern_types.clone(),
                        time_window_minutes: *time_window_minutes,
                        auto_execute: *auto_execute,
                        dry_run: false,
                    })
                    .await?;
                Ok(plain(serde_json::to_value(report)?))
            }
            Job::ActionExecution {
                organization_id,
                action_id,
                execution_id,
                pattern_id,
                dry_run,
            } => {
                // A retried attempt is a new execution; the first one is
                // already recorded as failed.
                let summary = self
                    .engine
                    .execute(ExecuteRequest {
                        organization_id: organization_id.clone(),
                        action_id: action_id.clone(),
                        execution_id: if attempt == 1 { *execution_id } else { None },
                        pattern_id: *pattern_id,
                        triggered_by: TriggeredBy::Schedule,
                        dry_run: *dry_run,
                        performed_by: "scheduler".to_string(),
                    })
                    .await?;
                let execution = &summary.execution;
                if execution.status == ExecutionStatus::Blocked {
                    let check = summary
                        .gate
                        .as_ref()
                        .and_then(|g| g.blocked_check.clone())
                        .unwrap_or_else(|| "approval".to_string());
                    return Err(HealError::GateBlocked {
                        check,
                        reason: execution.blocked_reason.clone().unwrap_or_default(),
                    });
                }
                let follow_up_at = execution.result.as_ref().and_then(|r| r.next_run_at);
                Ok(Dispatched {
                    output: serde_json::to_value(&summary)?,
                    follow_up_at,
                })
            }
            Job::ApprovalMaintenance { organization_id } => {
                let report = self.engine.maintain_approvals(organization_id).await?;
                Ok(plain(serde_json::to_value(report)?))
            }
            Job::LearningAnalysis {
                organization_id,
                analysis_window_days,
            } => {
                let report = self.engine.analyze(organization_id, *analysis_window_days)?;
                Ok(plain(serde_json::to_value(report)?))
            }
        }
    }

    /// Run every job due at `now` concurrently and persist the outcomes.
    ///
    /// Recurring jobs get their next occurrence queued whatever the outcome;
    /// reminder executions that asked to repeat get a follow-up job.
    pub async fn tick(&self, queue: &JobQueue, now: DateTime<Utc>) -> Result<Vec<(ScheduledJob, JobReport)>> {
        let due = queue.range_due(now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        for job in &due {
            queue.set_status(job.id, JobStatus::Running, None)?;
        }
        tracing::debug!(due = due.len(), "dispatching due jobs");

        let reports = join_all(due.iter().map(|j| self.run(&j.job))).await;

        let mut out = Vec::with_capacity(due.len());
        for (job, report) in due.into_iter().zip(reports) {
            let status = match (&report.output, &report.error) {
                (Some(output), _) if report.success => JobStatus::Completed {
                    result: output.clone(),
                },
                (_, error) => JobStatus::Failed {
                    reason: error.clone().unwrap_or_else(|| "unknown error".into()),
                },
            };
            queue.set_status(job.id, status, Some(report.attempts))?;

            if let Some(every) = job.recurrence {
                let next = Utc::now() + chrono::Duration::from_std(every).map_err(HealError::store)?;
                let mut again = ScheduledJob::new_scheduled(job.label.clone(), job.job.clone(), next, Some(every));
                if let Job::ActionExecution { execution_id, .. } = &mut again.job {
                    *execution_id = None;
                }
                queue.insert(&again)?;
                tracing::debug!(label = %job.label, next = %next, "recurring job queued");
            }

            if let (Some(at), Job::ActionExecution {
                organization_id,
                action_id,
                pattern_id,
                dry_run,
                ..
            }) = (report.follow_up_at, &job.job)
            {
                let follow_up = ScheduledJob::new_scheduled(
                    format!("{action_id} follow-up"),
                    Job::ActionExecution {
                        organization_id: organization_id.clone(),
                        action_id: action_id.clone(),
                        execution_id: None,
                        pattern_id: *pattern_id,
                        dry_run: *dry_run,
                    },
                    at,
                    None,
                );
                queue.insert(&follow_up)?;
                tracing::info!(action = %action_id, at = %at, "follow-up execution queued");
            }
            out.push((job, report));
        }
        Ok(out)
    }
}
