//! Re-run named operations as shell commands.
//!
//! `.selfheal/operations.yaml` maps an operation name to a command line:
//!
//! ```yaml
//! operations:
//!   sync-payroll: ./scripts/sync-payroll.sh
//! ```
//!
//! The command runs under `sh -c` in the project root with `SELFHEAL_ROOT`,
//! `SELFHEAL_ORG` and `SELFHEAL_PARAMS` (JSON) set. Exit status 0 is success.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::OperationRunner;
use crate::error::{HealError, Result};
use crate::paths;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OperationsFile {
    #[serde(default)]
    pub operations: BTreeMap<String, String>,
}

impl OperationsFile {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::operations_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }
}

pub struct CommandOperations {
    root: PathBuf,
    operations: BTreeMap<String, String>,
}

impl CommandOperations {
    pub fn new(root: &Path, operations: BTreeMap<String, String>) -> Self {
        Self {
            root: root.to_path_buf(),
            operations,
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        Ok(Self::new(root, OperationsFile::load(root)?.operations))
    }
}

#[async_trait]
impl OperationRunner for CommandOperations {
    async fn rerun(
        &self,
        organization_id: &str,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<bool> {
        let command = self.operations.get(operation).ok_or_else(|| {
            HealError::Configuration(format!("no command configured for operation '{operation}'"))
        })?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env("SELFHEAL_ROOT", &self.root)
            .env("SELFHEAL_ORG", organization_id)
            .env("SELFHEAL_PARAMS", params.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HealError::Adapter(format!("failed to spawn '{operation}': {e}")))?;

        if !output.status.success() {
            let hint: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(500)
                .collect();
            tracing::warn!(
                operation,
                status = ?output.status.code(),
                stderr = %hint.trim(),
                "operation exited non-zero"
            );
        }
        Ok(output.status.success())
    }
}
