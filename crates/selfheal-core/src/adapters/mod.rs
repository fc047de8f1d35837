//! Boundaries to the systems the engine observes and acts on.
//!
//! The engine never talks to a database, mail server or task tracker
//! directly. Everything goes through these traits, bundled in [`Services`].

pub mod command;
pub mod files;
pub mod http;
pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HealError, Result};
use crate::pattern::{ActivitySignal, TimeWindow};
use crate::types::{Channel, TargetRef};

// ---------------------------------------------------------------------------
// Pattern store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Every signal for the organization inside `window`. An error fails the scan.
    async fn query_activity_signals(
        &self,
        organization_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<ActivitySignal>>;
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub absent: bool,
    /// Channel → address (mailbox, chat handle, webhook url).
    #[serde(default)]
    pub addresses: BTreeMap<Channel, String>,
}

fn default_true() -> bool {
    true
}

impl Recipient {
    pub fn is_available(&self) -> bool {
        self.active && !self.absent
    }

    pub fn matches(&self, target: &TargetRef) -> bool {
        match target {
            TargetRef::Person { id } => &self.id == id,
            TargetRef::Role { name } => self.roles.contains(name),
            TargetRef::Team { name } => self.teams.contains(name),
            TargetRef::Pool { name } => self.pools.contains(name),
        }
    }

    pub fn address(&self, channel: Channel) -> Option<&str> {
        self.addresses.get(&channel).map(String::as_str)
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn members(&self, organization_id: &str) -> Result<Vec<Recipient>>;

    /// Everyone the target names, available or not. Ordered by id.
    async fn resolve(&self, organization_id: &str, target: &TargetRef) -> Result<Vec<Recipient>> {
        let mut out: Vec<Recipient> = self
            .members(organization_id)
            .await?
            .into_iter()
            .filter(|r| r.matches(target))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub organization_id: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// `Ok(false)` means the recipient could not be reached on this channel.
    /// `Err` is reserved for transport failures.
    async fn deliver(&self, recipient: &Recipient, message: &Message) -> Result<bool>;
}

/// One delivery adapter per channel.
#[derive(Default, Clone)]
pub struct DeliveryRouter {
    adapters: HashMap<Channel, Arc<dyn DeliveryAdapter>>,
}

impl DeliveryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn DeliveryAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn DeliveryAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }

    pub async fn deliver(&self, recipient: &Recipient, message: &Message) -> Result<bool> {
        let adapter = self.adapters.get(&message.channel).ok_or_else(|| {
            HealError::Configuration(format!(
                "no delivery adapter registered for channel '{}'",
                message.channel
            ))
        })?;
        let delivered = adapter.deliver(recipient, message).await?;
        tracing::debug!(
            channel = %message.channel,
            recipient = %recipient.id,
            delivered,
            "delivery attempted"
        );
        Ok(delivered)
    }
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub title: String,
    pub assignee: String,
}

#[async_trait]
pub trait Workload: Send + Sync {
    async fn list_assigned(&self, organization_id: &str, assignee: &str) -> Result<Vec<WorkItem>>;

    /// Move one item. Fails if the item is not currently held by `from`.
    async fn reassign(&self, organization_id: &str, item_id: &str, from: &str, to: &str)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Re-invoke a named operation once. `Ok(false)` is a failed attempt.
    async fn rerun(
        &self,
        organization_id: &str,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Every external collaborator the engine needs, shared across tasks.
#[derive(Clone)]
pub struct Services {
    pub signals: Arc<dyn SignalSource>,
    pub directory: Arc<dyn Directory>,
    pub delivery: DeliveryRouter,
    pub workload: Arc<dyn Workload>,
    pub operations: Arc<dyn OperationRunner>,
    pub http: http::WebhookClient,
}

impl Services {
    /// Availability of a target: `(available, total)` resolved recipients.
    pub async fn target_availability(
        &self,
        organization_id: &str,
        target: &TargetRef,
    ) -> Result<(usize, usize)> {
        let resolved = self.directory.resolve(organization_id, target).await?;
        let available = resolved.iter().filter(|r| r.is_available()).count();
        Ok((available, resolved.len()))
    }
}
