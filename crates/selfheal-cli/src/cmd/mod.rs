pub mod approvals;
pub mod audit;
pub mod config;
pub mod execute;
pub mod executions;
pub mod init;
pub mod jobs;
pub mod learn;
pub mod rollback;
pub mod run;
pub mod scan;
pub mod signal;
