use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HealError;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(HealError::Configuration(format!(
                "unknown severity '{s}': must be low, medium, high, or critical"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The closed set of remediation kinds the executor registry dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Reminder,
    Escalation,
    Retry,
    Redistribute,
    Notify,
    Custom,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Reminder,
            ActionKind::Escalation,
            ActionKind::Retry,
            ActionKind::Redistribute,
            ActionKind::Notify,
            ActionKind::Custom,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Reminder => "reminder",
            ActionKind::Escalation => "escalation",
            ActionKind::Retry => "retry",
            ActionKind::Redistribute => "redistribute",
            ActionKind::Notify => "notify",
            ActionKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| HealError::UnknownActionKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TriggerType / TriggeredBy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Pattern,
    Threshold,
    Schedule,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Schedule,
    Pattern,
    Manual,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggeredBy::Schedule => "schedule",
            TriggeredBy::Pattern => "pattern",
            TriggeredBy::Manual => "manual",
        })
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Chat,
    InApp,
    Webhook,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Chat => "chat",
            Channel::InApp => "in_app",
            Channel::Webhook => "webhook",
        }
    }

    /// Channels a human recipient can be reached on.
    pub fn is_personal(self) -> bool {
        !matches!(self, Channel::Webhook)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            "in_app" | "in-app" => Ok(Channel::InApp),
            "webhook" => Ok(Channel::Webhook),
            _ => Err(HealError::Configuration(format!(
                "unknown channel '{s}': must be email, chat, in_app, or webhook"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityRef / TargetRef
// ---------------------------------------------------------------------------

/// An organizational entity referenced as evidence by a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
}

/// Who an action addresses. Resolved to concrete recipients by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetRef {
    Person { id: String },
    Role { name: String },
    Team { name: String },
    Pool { name: String },
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Person { id } => write!(f, "person:{id}"),
            TargetRef::Role { name } => write!(f, "role:{name}"),
            TargetRef::Team { name } => write!(f, "team:{name}"),
            TargetRef::Pool { name } => write!(f, "pool:{name}"),
        }
    }
}
