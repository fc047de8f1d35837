use crate::output::{print_json, print_table, short_id, timestamp};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use selfheal_core::jobs::{Job, JobQueue, ScheduledJob};
use selfheal_core::paths;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Copy, ValueEnum)]
pub enum JobKindArg {
    Scan,
    Execute,
    Approvals,
    Learn,
}

#[derive(Subcommand)]
pub enum JobsSubcommand {
    /// Queue a job for the runner
    Schedule {
        #[arg(value_enum)]
        kind: JobKindArg,
        /// Organization id
        #[arg(long)]
        org: String,
        /// Action id (execute jobs)
        #[arg(long)]
        action: Option<String>,
        /// Pattern id (execute jobs)
        #[arg(long)]
        pattern: Option<Uuid>,
        /// Execute matching actions after a scan (scan jobs)
        #[arg(long)]
        auto_execute: bool,
        /// Simulate without side effects (execute jobs)
        #[arg(long)]
        dry_run: bool,
        /// Window in minutes for scans, days for learning
        #[arg(long)]
        window: Option<u32>,
        /// When the job becomes due (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Re-queue every N seconds after each run
        #[arg(long)]
        every: Option<u64>,
        /// Label shown in listings
        #[arg(long)]
        label: Option<String>,
    },

    /// List queued and finished jobs
    List {
        /// Only pending jobs
        #[arg(long)]
        pending: bool,
    },
}

pub fn run(root: &Path, subcmd: JobsSubcommand, json: bool) -> anyhow::Result<()> {
    if !paths::is_initialized(root) {
        anyhow::bail!(selfheal_core::HealError::NotInitialized);
    }
    let queue = JobQueue::open(&paths::jobs_db_path(root)).context("failed to open job queue")?;
    match subcmd {
        JobsSubcommand::Schedule {
            kind,
            org,
            action,
            pattern,
            auto_execute,
            dry_run,
            window,
            at,
            every,
            label,
        } => {
            let job = match kind {
                JobKindArg::Scan => Job::PatternScan {
                    organization_id: org,
                    pattern_types: None,
                    time_window_minutes: window,
                    auto_execute,
                },
                JobKindArg::Execute => Job::ActionExecution {
                    organization_id: org,
                    action_id: action.context("execute jobs need --action")?,
                    execution_id: None,
                    pattern_id: pattern,
                    dry_run,
                },
                JobKindArg::Approvals => Job::ApprovalMaintenance {
                    organization_id: org,
                },
                JobKindArg::Learn => Job::LearningAnalysis {
                    organization_id: org,
                    analysis_window_days: window,
                },
            };
            let label = label.unwrap_or_else(|| job.kind().to_string());
            let scheduled = ScheduledJob::new_scheduled(
                label,
                job,
                at.unwrap_or_else(Utc::now),
                every.map(Duration::from_secs),
            );
            queue.insert(&scheduled)?;
            if json {
                print_json(&scheduled)
            } else {
                println!(
                    "Scheduled {} '{}' for {}",
                    scheduled.id,
                    scheduled.label,
                    timestamp(&scheduled.trigger.key_ts())
                );
                Ok(())
            }
        }
        JobsSubcommand::List { pending } => {
            let jobs: Vec<_> = queue
                .list_all()?
                .into_iter()
                .filter(|j| !pending || j.status.label() == "pending")
                .collect();
            if json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs.");
                return Ok(());
            }
            let rows = jobs
                .iter()
                .map(|j| {
                    vec![
                        short_id(&j.id),
                        j.label.clone(),
                        j.job.kind().to_string(),
                        j.job.organization_id().to_string(),
                        j.status.label().to_string(),
                        j.attempts.to_string(),
                        timestamp(&j.trigger.key_ts()),
                        j.recurrence
                            .map(|d| format!("{}s", d.as_secs()))
                            .unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(
                &["ID", "LABEL", "KIND", "ORG", "STATUS", "ATTEMPTS", "DUE", "EVERY"],
                rows,
            );
            Ok(())
        }
    }
}
