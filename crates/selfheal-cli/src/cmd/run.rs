use crate::output::{print_json, short_id};
use crate::services::open_engine;
use anyhow::Context;
use chrono::Utc;
use selfheal_core::jobs::{JobQueue, JobReport, JobRunner, ScheduledJob};
use selfheal_core::paths;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run(root: &Path, once: bool, interval: u64, json: bool) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(root)?);
    let queue = JobQueue::open(&paths::jobs_db_path(root)).context("failed to open job queue")?;

    let stale = Duration::from_secs(u64::from(engine.config().jobs.stale_running_minutes) * 60);
    queue.startup_recovery(stale)?;
    let recovered = engine.recover(stale)?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "recovered interrupted executions");
    }

    let runner = JobRunner::new(engine);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(drive(runner, queue, once, interval, json))
}

async fn drive(
    runner: JobRunner,
    queue: JobQueue,
    once: bool,
    interval: u64,
    json: bool,
) -> anyhow::Result<()> {
    if once {
        let done = runner.tick(&queue, Utc::now()).await?;
        return report(&done, json);
    }

    tracing::info!(interval_secs = interval, "job runner started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match runner.tick(&queue, Utc::now()).await {
                    Ok(done) if !done.is_empty() => report(&done, json)?,
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "tick failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("job runner stopping");
                return Ok(());
            }
        }
    }
}

fn report(done: &[(ScheduledJob, JobReport)], json: bool) -> anyhow::Result<()> {
    if json {
        let value: Vec<_> = done
            .iter()
            .map(|(job, report)| serde_json::json!({ "job": job, "report": report }))
            .collect();
        return print_json(&value);
    }
    if done.is_empty() {
        println!("No jobs due.");
        return Ok(());
    }
    for (job, r) in done {
        let outcome = if r.success { "ok" } else { "failed" };
        let detail = r.error.as_deref().unwrap_or("");
        println!(
            "{} {} [{}] {outcome} after {} attempt(s) in {} ms {detail}",
            short_id(&job.id),
            job.label,
            r.kind,
            r.attempts,
            r.duration_ms
        );
    }
    Ok(())
}
