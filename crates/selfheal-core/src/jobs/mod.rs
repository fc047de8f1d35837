//! Persistent job queue and runner for the engine's four background operation
//! types.
//!
//! `ScheduledJob`, `JobTrigger` and `JobStatus` model the queue; `JobQueue`
//! stores it in redb; `JobRunner` executes due jobs with per-kind
//! concurrency caps and retry/backoff.

pub mod db;
pub mod job;
pub mod runner;

pub use db::JobQueue;
pub use job::{Job, JobKind, JobStatus, JobTrigger, ScheduledJob};
pub use runner::{JobReport, JobRunner};
