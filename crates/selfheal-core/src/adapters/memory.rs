//! In-process adapters for embedding the engine and for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    DeliveryAdapter, Directory, Message, OperationRunner, Recipient, SignalSource, WorkItem,
    Workload,
};
use crate::error::{HealError, Result};
use crate::pattern::{ActivitySignal, TimeWindow};
use crate::types::Channel;

fn poisoned<T>(_: T) -> HealError {
    HealError::Adapter("adapter lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// MemorySignals
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySignals {
    signals: Mutex<Vec<ActivitySignal>>,
    failure: Option<String>,
}

impl MemorySignals {
    pub fn new(signals: Vec<ActivitySignal>) -> Self {
        Self {
            signals: Mutex::new(signals),
            failure: None,
        }
    }

    /// A source whose every query fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
            failure: Some(reason.to_string()),
        }
    }

    pub fn push(&self, signal: ActivitySignal) -> Result<()> {
        self.signals.lock().map_err(poisoned)?.push(signal);
        Ok(())
    }
}

#[async_trait]
impl SignalSource for MemorySignals {
    async fn query_activity_signals(
        &self,
        organization_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<ActivitySignal>> {
        if let Some(reason) = &self.failure {
            return Err(HealError::SignalSource(reason.clone()));
        }
        let signals = self.signals.lock().map_err(poisoned)?;
        Ok(signals
            .iter()
            .filter(|s| s.organization_id == organization_id && window.contains(s.occurred_at))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// A directory shared by every organization.
pub struct MemoryDirectory {
    members: Mutex<Vec<Recipient>>,
}

impl MemoryDirectory {
    pub fn new(members: Vec<Recipient>) -> Self {
        Self {
            members: Mutex::new(members),
        }
    }

    pub fn set_absent(&self, id: &str, absent: bool) -> Result<()> {
        let mut members = self.members.lock().map_err(poisoned)?;
        for m in members.iter_mut().filter(|m| m.id == id) {
            m.absent = absent;
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn members(&self, _organization_id: &str) -> Result<Vec<Recipient>> {
        Ok(self.members.lock().map_err(poisoned)?.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryOutbox
// ---------------------------------------------------------------------------

/// Records deliveries instead of sending them.
pub struct MemoryOutbox {
    channel: Channel,
    sent: Mutex<Vec<(String, Message)>>,
    /// Deliveries beyond this many fail with a transport error.
    fail_after: Option<usize>,
    /// Artificial latency per delivery.
    delay: Option<std::time::Duration>,
}

impl MemoryOutbox {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Mutex::new(Vec::new()),
            fail_after: None,
            delay: None,
        }
    }

    pub fn failing_after(channel: Channel, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(channel)
        }
    }

    pub fn slow(channel: Channel, delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(channel)
        }
    }

    /// `(recipient id, message)` in delivery order.
    pub fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeliveryAdapter for MemoryOutbox {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, recipient: &Recipient, message: &Message) -> Result<bool> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut sent = self.sent.lock().map_err(poisoned)?;
        if let Some(limit) = self.fail_after {
            if sent.len() >= limit {
                return Err(HealError::DeliveryFailure {
                    channel: self.channel.to_string(),
                    reason: "outbox unavailable".to_string(),
                });
            }
        }
        if recipient.address(self.channel).is_none() && self.channel != Channel::InApp {
            return Ok(false);
        }
        sent.push((recipient.id.clone(), message.clone()));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkload
// ---------------------------------------------------------------------------

pub struct MemoryWorkload {
    items: Mutex<Vec<WorkItem>>,
    /// Reassignments beyond this many fail.
    fail_after: Option<usize>,
    moves: Mutex<usize>,
}

impl MemoryWorkload {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            items: Mutex::new(items),
            fail_after: None,
            moves: Mutex::new(0),
        }
    }

    pub fn failing_after(items: Vec<WorkItem>, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(items)
        }
    }

    pub fn assignee_of(&self, item_id: &str) -> Option<String> {
        self.items
            .lock()
            .ok()?
            .iter()
            .find(|i| i.id == item_id)
            .map(|i| i.assignee.clone())
    }
}

#[async_trait]
impl Workload for MemoryWorkload {
    async fn list_assigned(&self, organization_id: &str, assignee: &str) -> Result<Vec<WorkItem>> {
        let items = self.items.lock().map_err(poisoned)?;
        Ok(items
            .iter()
            .filter(|i| i.organization_id == organization_id && i.assignee == assignee)
            .cloned()
            .collect())
    }

    async fn reassign(
        &self,
        organization_id: &str,
        item_id: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let mut moves = self.moves.lock().map_err(poisoned)?;
        if let Some(limit) = self.fail_after {
            if *moves >= limit {
                return Err(HealError::Adapter(format!(
                    "workload service rejected move of {item_id}"
                )));
            }
        }
        let mut items = self.items.lock().map_err(poisoned)?;
        let item = items
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
        *moves += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedOperations
// ---------------------------------------------------------------------------

/// Replays a fixed list of outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedOperations {
    outcomes: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOperations {
    pub fn new(outcomes: Vec<bool>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OperationRunner for ScriptedOperations {
    async fn rerun(
        &self,
        _organization_id: &str,
        operation: &str,
        _params: &serde_json::Value,
    ) -> Result<bool> {
        self.calls
            .lock()
            .map_err(poisoned)?
            .push(operation.to_string());
        Ok(self
            .outcomes
            .lock()
            .map_err(poisoned)?
            .pop_front()
            .unwrap_or(true))
    }
}
