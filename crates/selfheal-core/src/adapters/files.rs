//! File-backed adapters under the project's `.selfheal/` directory.
//!
//! Signals are an append-only JSONL log per organization. The directory and
//! workload ledger are YAML documents edited by operators. Email and in-app
//! deliveries land in a JSONL outbox per channel for an external relay.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{DeliveryAdapter, Directory, Message, Recipient, SignalSource, WorkItem, Workload};
use crate::error::{HealError, Result};
use crate::io;
use crate::paths;
use crate::pattern::{ActivitySignal, TimeWindow};
use crate::types::Channel;

// ---------------------------------------------------------------------------
// JsonlSignals
// ---------------------------------------------------------------------------

pub struct JsonlSignals {
    root: PathBuf,
}

impl JsonlSignals {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Append one signal to its organization's log.
    pub fn record(root: &Path, signal: &ActivitySignal) -> Result<()> {
        let line = serde_json::to_string(signal)?;
        io::append_line(&paths::signals_path(root, &signal.organization_id), &line)
    }
}

#[async_trait]
impl SignalSource for JsonlSignals {
    async fn query_activity_signals(
        &self,
        organization_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<ActivitySignal>> {
        let path = paths::signals_path(&self.root, organization_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HealError::SignalSource(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };

        let mut out = Vec::new();
        for (n, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let signal: ActivitySignal = serde_json::from_str(line).map_err(|e| {
                HealError::SignalSource(format!("{}:{}: {e}", path.display(), n + 1))
            })?;
            if signal.organization_id == organization_id && window.contains(signal.occurred_at) {
                out.push(signal);
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// YamlDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    /// Organization id → members.
    #[serde(default)]
    pub organizations: std::collections::BTreeMap<String, Vec<Recipient>>,
}

pub struct YamlDirectory {
    root: PathBuf,
}

impl YamlDirectory {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn load(root: &Path) -> Result<DirectoryFile> {
        let path = paths::directory_path(root);
        if !path.exists() {
            return Ok(DirectoryFile::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(DirectoryFile::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }
}

#[async_trait]
impl Directory for YamlDirectory {
    async fn members(&self, organization_id: &str) -> Result<Vec<Recipient>> {
        let mut file = Self::load(&self.root)?;
        Ok(file
            .organizations
            .remove(organization_id)
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// YamlWorkload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkloadFile {
    #[serde(default)]
    pub items: Vec<WorkItem>,
}

pub struct YamlWorkload {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl YamlWorkload {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<WorkloadFile> {
        let path = paths::workload_path(&self.root);
        if !path.exists() {
            return Ok(WorkloadFile::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(WorkloadFile::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }
}

#[async_trait]
impl Workload for YamlWorkload {
    async fn list_assigned(&self, organization_id: &str, assignee: &str) -> Result<Vec<WorkItem>> {
        Ok(self
            .load()?
            .items
            .into_iter()
            .filter(|i| i.organization_id == organization_id && i.assignee == assignee)
            .collect())
    }

    async fn reassign(
        &self,
        organization_id: &str,
        item_id: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HealError::Adapter("workload lock poisoned".to_string()))?;
        let mut file = self.load()?;
        let item = file
            .items
            .iter_mut()
            .find(|i| i.id == item_id && i.organization_id == organization_id)
            .ok_or_else(|| HealError::Adapter(format!("work item {item_id} not found")))?;
        if item.assignee != from {
            return Err(HealError::Adapter(format!(
                "work item {item_id} is assigned to {}, not {from}",
                item.assignee
            )));
        }
        item.assignee = to.to_string();
        let data = serde_yaml::to_string(&file)?;
        io::atomic_write(&paths::workload_path(&self.root), data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// OutboxDelivery
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub queued_at: chrono::DateTime<Utc>,
    pub channel: Channel,
    pub recipient_id: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<uuid::Uuid>,
}

/// Queues messages to `.selfheal/outbox/<channel>.jsonl`.
pub struct OutboxDelivery {
    root: PathBuf,
    channel: Channel,
}

impl OutboxDelivery {
    pub fn new(root: &Path, channel: Channel) -> Self {
        Self {
            root: root.to_path_buf(),
            channel,
        }
    }
}

#[async_trait]
impl DeliveryAdapter for OutboxDelivery {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, recipient: &Recipient, message: &Message) -> Result<bool> {
        let address = match (recipient.address(self.channel), self.channel) {
            (Some(a), _) => a.to_string(),
            (None, Channel::InApp) => recipient.id.clone(),
            (None, _) => return Ok(false),
        };
        let record = OutboxRecord {
            queued_at: Utc::now(),
            channel: self.channel,
            recipient_id: recipient.id.clone(),
            address,
            subject: message.subject.clone(),
            body: message.body.clone(),
            execution_id: message.execution_id,
        };
        let line = serde_json::to_string(&record)?;
        io::append_line(&paths::outbox_path(&self.root, self.channel.as_str()), &line).map_err(
            |e| HealError::DeliveryFailure {
                channel: self.channel.to_string(),
                reason: e.to_string(),
            },
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityRef;
    use chrono::Duration;
    use tempfile::TempDir;

    fn signal(org: &str, minutes_ago: i64) -> ActivitySignal {
        ActivitySignal {
            id: format!("s-{minutes_ago}"),
            organization_id: org.into(),
            kind: "overdue_task".into(),
            entity: EntityRef {
                id: "t-1".into(),
                entity_type: "task".into(),
                name: "Report".into(),
            },
            severity: crate::types::Severity::Low,
            weight: 1.0,
            occurred_at: Utc::now() - Duration::minutes(minutes_ago),
            details: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn jsonl_signals_filter_by_window() {
        let dir = TempDir::new().unwrap();
        JsonlSignals::record(dir.path(), &signal("org-1", 5)).unwrap();
        JsonlSignals::record(dir.path(), &signal("org-1", 500)).unwrap();
        let source = JsonlSignals::new(dir.path());
        let got = source
            .query_activity_signals("org-1", TimeWindow::trailing(Utc::now(), 60))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_signal_line_fails_the_query() {
        let dir = TempDir::new().unwrap();
        let path = paths::signals_path(dir.path(), "org-1");
        io::append_line(&path, "{not json").unwrap();
        let err = JsonlSignals::new(dir.path())
            .query_activity_signals("org-1", TimeWindow::trailing(Utc::now(), 60))
            .await
            .unwrap_err();
        assert!(matches!(err, HealError::SignalSource(ref m) if m.contains(":1:")));
    }

    #[tokio::test]
    async fn yaml_workload_reassign_persists() {
        let dir = TempDir::new().unwrap();
        let yaml = "items:\n  - id: w-1\n    organization_id: org-1\n    assignee: alice\n";
        io::atomic_write(&paths::workload_path(dir.path()), yaml.as_bytes()).unwrap();

        let w = YamlWorkload::new(dir.path());
        w.reassign("org-1", "w-1", "alice", "bob").await.unwrap();
        let bob = w.list_assigned("org-1", "bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert!(w.list_assigned("org-1", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outbox_skips_recipients_without_address() {
        let dir = TempDir::new().unwrap();
        let outbox = OutboxDelivery::new(dir.path(), Channel::Email);
        let r = Recipient {
            id: "u-1".into(),
            name: "Ada".into(),
            roles: vec![],
            teams: vec![],
            pools: vec![],
            active: true,
            absent: false,
            addresses: Default::default(),
        };
        let msg = Message {
            organization_id: "org-1".into(),
            channel: Channel::Email,
            subject: None,
            body: "hi".into(),
            execution_id: None,
        };
        assert!(!outbox.deliver(&r, &msg).await.unwrap());

        let inbox = OutboxDelivery::new(dir.path(), Channel::InApp);
        assert!(inbox.deliver(&r, &msg).await.unwrap());
        let written = std::fs::read_to_string(paths::outbox_path(dir.path(), "in_app")).unwrap();
        assert!(written.contains("\"recipient_id\":\"u-1\""));
    }
}
