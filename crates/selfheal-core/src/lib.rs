pub mod action;
pub mod adapters;
pub mod approval;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executor;
pub mod io;
pub mod jobs;
pub mod learning;
pub mod paths;
pub mod pattern;
pub mod safety;
pub mod store;
pub mod template;
pub mod types;

pub use engine::{Engine, ExecuteRequest, ExecutionSummary, ScanReport, ScanRequest};
pub use error::{HealError, Result};
