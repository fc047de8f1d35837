use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SELFHEAL_DIR: &str = ".selfheal";
pub const SIGNALS_DIR: &str = ".selfheal/signals";
pub const OUTBOX_DIR: &str = ".selfheal/outbox";

pub const CONFIG_FILE: &str = ".selfheal/config.yaml";
pub const ACTIONS_FILE: &str = ".selfheal/actions.yaml";
pub const DIRECTORY_FILE: &str = ".selfheal/directory.yaml";
pub const WORKLOAD_FILE: &str = ".selfheal/workload.yaml";
pub const OPERATIONS_FILE: &str = ".selfheal/operations.yaml";

pub const ENGINE_DB: &str = ".selfheal/engine.redb";
pub const JOBS_DB: &str = ".selfheal/jobs.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn actions_path(root: &Path) -> PathBuf {
    root.join(ACTIONS_FILE)
}

pub fn directory_path(root: &Path) -> PathBuf {
    root.join(DIRECTORY_FILE)
}

pub fn workload_path(root: &Path) -> PathBuf {
    root.join(WORKLOAD_FILE)
}

pub fn operations_path(root: &Path) -> PathBuf {
    root.join(OPERATIONS_FILE)
}

pub fn engine_db_path(root: &Path) -> PathBuf {
    root.join(ENGINE_DB)
}

pub fn jobs_db_path(root: &Path) -> PathBuf {
    root.join(JOBS_DB)
}

/// Append-only JSONL signal log for one organization.
pub fn signals_path(root: &Path, organization_id: &str) -> PathBuf {
    root.join(SIGNALS_DIR).join(format!("{organization_id}.jsonl"))
}

pub fn outbox_path(root: &Path, channel: &str) -> PathBuf {
    root.join(OUTBOX_DIR).join(format!("{channel}.jsonl"))
}

pub fn is_initialized(root: &Path) -> bool {
    config_path(root).exists()
}
