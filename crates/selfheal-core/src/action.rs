//! Automated action configuration: what to do, when, and against whom.
//!
//! `ActionConfig` is a tagged variant per [`ActionKind`]. It is parsed once when
//! the catalog loads and validated once by the Safety Gate's
//! configuration-validity check; executors receive the already-typed variant.

use crate::config::Environment;
use crate::error::{HealError, Result};
use crate::paths;
use crate::pattern::DetectedPattern;
use crate::template;
use crate::types::{ActionKind, Channel, Severity, TargetRef, TriggerType};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// Upper bound on `retry.max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// TriggerConfig
// ---------------------------------------------------------------------------

/// Which detected patterns fire a pattern-triggered action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Empty means any pattern type.
    #[serde(default)]
    pub pattern_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl TriggerConfig {
    pub fn matches(&self, pattern: &DetectedPattern) -> bool {
        if !self.pattern_types.is_empty() && !self.pattern_types.contains(&pattern.pattern_type) {
            return false;
        }
        if let Some(min) = self.min_severity {
            if pattern.severity < min {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if pattern.confidence < min {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Per-kind configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub recipients: Vec<TargetRef>,
    pub message_template: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_minutes: Option<u32>,
    /// Cap on reminders per (action, pattern). `None` means uncapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reminders: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Ordered handlers; the first one reached ends the walk.
    pub chain: Vec<TargetRef>,
    pub message_template: String,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub operation: String,
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    /// Delay before attempt n is `backoff_seconds * 2^(n-2)`; 0 disables waiting.
    #[serde(default)]
    pub backoff_seconds: u64,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_retry_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedistributeConfig {
    pub from_assignee: String,
    pub to_assignee: String,
    /// Restrict the move to these items. Empty means every open item.
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub recipients: Vec<TargetRef>,
    pub message_template: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Rendered and sent as the `message` field of the JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_template: Option<String>,
}

// ---------------------------------------------------------------------------
// ActionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    Reminder(ReminderConfig),
    Escalation(EscalationConfig),
    Retry(RetryConfig),
    Redistribute(RedistributeConfig),
    Notify(NotifyConfig),
    Custom(WebhookConfig),
}

impl ActionConfig {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionConfig::Reminder(_) => ActionKind::Reminder,
            ActionConfig::Escalation(_) => ActionKind::Escalation,
            ActionConfig::Retry(_) => ActionKind::Retry,
            ActionConfig::Redistribute(_) => ActionKind::Redistribute,
            ActionConfig::Notify(_) => ActionKind::Notify,
            ActionConfig::Custom(_) => ActionKind::Custom,
        }
    }

    /// The people/roles/pools this action must be able to reach.
    pub fn targets(&self) -> Vec<TargetRef> {
        match self {
            ActionConfig::Reminder(c) => c.recipients.clone(),
            ActionConfig::Notify(c) => c.recipients.clone(),
            ActionConfig::Escalation(c) => c.chain.clone(),
            ActionConfig::Redistribute(c) => vec![TargetRef::Person {
                id: c.to_assignee.clone(),
            }],
            ActionConfig::Retry(_) | ActionConfig::Custom(_) => Vec::new(),
        }
    }

    /// Structural checks for the variant. An empty result means valid.
    pub fn validate(&self, environment: Environment) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            ActionConfig::Reminder(c) => {
                validate_message(&c.recipients, &c.message_template, c.channel, &mut errors);
                if c.max_reminders == Some(0) {
                    errors.push("max_reminders must be at least 1".to_string());
                }
                if c.repeat_interval_minutes == Some(0) {
                    errors.push("repeat_interval_minutes must be positive".to_string());
                }
            }
            ActionConfig::Notify(c) => {
                validate_message(&c.recipients, &c.message_template, c.channel, &mut errors);
            }
            ActionConfig::Escalation(c) => {
                validate_message(&c.chain, &c.message_template, c.channel, &mut errors);
            }
            ActionConfig::Retry(c) => {
                if c.operation.trim().is_empty() {
                    errors.push("retry operation name is required".to_string());
                }
                if c.max_attempts == 0 || c.max_attempts > MAX_RETRY_ATTEMPTS {
                    errors.push(format!(
                        "max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                        c.max_attempts
                    ));
                }
            }
            ActionConfig::Redistribute(c) => {
                if c.from_assignee.trim().is_empty() || c.to_assignee.trim().is_empty() {
                    errors.push("from_assignee and to_assignee are required".to_string());
                }
                if c.from_assignee == c.to_assignee {
                    errors.push("from_assignee and to_assignee must differ".to_string());
                }
                if c.max_items == Some(0) {
                    errors.push("max_items must be at least 1".to_string());
                }
            }
            ActionConfig::Custom(c) => {
                if let Err(e) = check_webhook_url(&c.url, environment) {
                    errors.push(e);
                }
                if let Some(t) = &c.payload_template {
                    for p in template::unknown_placeholders(t) {
                        errors.push(format!("unknown placeholder '{{{{{p}}}}}' in payload_template"));
                    }
                }
            }
        }
        errors
    }
}

fn validate_message(
    targets: &[TargetRef],
    message_template: &str,
    channel: Channel,
    errors: &mut Vec<String>,
) {
    if targets.is_empty() {
        errors.push("at least one recipient is required".to_string());
    }
    if message_template.trim().is_empty() {
        errors.push("message_template is required".to_string());
    }
    for p in template::unknown_placeholders(message_template) {
        errors.push(format!("unknown placeholder '{{{{{p}}}}}' in message_template"));
    }
    if !channel.is_personal() {
        errors.push(format!(
            "channel '{channel}' is not valid here: must be email, chat, or in_app"
        ));
    }
}

/// Reject webhook targets on loopback or internal networks, and plain HTTP
/// in production.
pub fn check_webhook_url(raw: &str, environment: Environment) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid webhook url '{raw}': {e}"))?;
    match url.scheme() {
        "https" => {}
        "http" if environment == Environment::Development => {}
        "http" => return Err("webhook url must use https in production".to_string()),
        other => return Err(format!("unsupported webhook scheme '{other}'")),
    }
    let host = url
        .host_str()
        .ok_or_else(|| "webhook url has no host".to_string())?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(format!("webhook url targets internal address {ip}"));
        }
    } else if host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
    {
        return Err(format!("webhook url targets internal host '{host}'"));
    }
    Ok(url)
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg0 & 0xfe00) == 0xfc00
                || (seg0 & 0xffc0) == 0xfe80
                || v6
                    .to_ipv4_mapped()
                    .map(|v4| is_internal_ip(&IpAddr::V4(v4)))
                    .unwrap_or(false)
        }
    }
}

// ---------------------------------------------------------------------------
// AutomatedAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatedAction {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: TriggerConfig,
    pub action_type: ActionKind,
    pub action_config: ActionConfig,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Overrides the organization's execution timeout for this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_active() -> bool {
    true
}

impl AutomatedAction {
    /// Full configuration check: kind agreement plus the variant's own rules.
    pub fn validate(&self, environment: Environment) -> Vec<String> {
        let mut errors = Vec::new();
        if self.action_type != self.action_config.kind() {
            errors.push(format!(
                "action_type '{}' does not match action_config kind '{}'",
                self.action_type,
                self.action_config.kind()
            ));
        }
        errors.extend(self.action_config.validate(environment));
        errors
    }
}

// ---------------------------------------------------------------------------
// ActionCatalog
// ---------------------------------------------------------------------------

/// The organization-owned action configurations, read-only during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionCatalog {
    #[serde(default)]
    pub actions: Vec<AutomatedAction>,
}

impl ActionCatalog {
    pub fn new(actions: Vec<AutomatedAction>) -> Self {
        Self { actions }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::actions_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let catalog: ActionCatalog = serde_yaml::from_str(&data)?;
        catalog.check_unique_ids()?;
        Ok(catalog)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::actions_path(root), data.as_bytes())
    }

    pub fn get(&self, organization_id: &str, action_id: &str) -> Result<&AutomatedAction> {
        self.actions
            .iter()
            .find(|a| a.id == action_id && a.organization_id == organization_id)
            .ok_or_else(|| HealError::ActionNotFound(action_id.to_string()))
    }

    pub fn for_organization<'a>(
        &'a self,
        organization_id: &'a str,
    ) -> impl Iterator<Item = &'a AutomatedAction> + 'a {
        self.actions
            .iter()
            .filter(move |a| a.organization_id == organization_id)
    }

    fn check_unique_ids(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for a in &self.actions {
            if !seen.insert((&a.organization_id, &a.id)) {
                return Err(HealError::Configuration(format!(
                    "duplicate action id '{}' in organization '{}'",
                    a.id, a.organization_id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
