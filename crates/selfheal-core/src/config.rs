use crate::error::{HealError, Result};
use crate::paths;
use crate::types::{ActionKind, Channel, Severity, TargetRef};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

// ---------------------------------------------------------------------------
// SafetyPolicy
// ---------------------------------------------------------------------------

/// Limits the Safety Gate enforces for one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: u32,
    #[serde(default = "default_max_affected")]
    pub max_affected_entities: usize,
    #[serde(default = "default_cooldown")]
    pub min_action_cooldown_minutes: u32,
    /// UTC hours (0-23) during which no automated action may start.
    #[serde(default)]
    pub blocked_hours: Vec<u32>,
    #[serde(default)]
    pub blocked_weekdays: Vec<Weekday>,
    /// Action kinds that always route through human approval.
    #[serde(default)]
    pub approval_required_kinds: Vec<ActionKind>,
    /// Patterns at or above this severity route through human approval.
    #[serde(default = "default_approval_severity")]
    pub approval_severity_threshold: Option<Severity>,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: u64,
}

fn default_max_actions_per_hour() -> u32 {
    20
}

fn default_max_concurrent() -> u32 {
    3
}

fn default_max_affected() -> usize {
    50
}

fn default_cooldown() -> u32 {
    15
}

fn default_approval_severity() -> Option<Severity> {
    Some(Severity::Critical)
}

fn default_execution_timeout() -> u64 {
    30
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_actions_per_hour: default_max_actions_per_hour(),
            max_concurrent_executions: default_max_concurrent(),
            max_affected_entities: default_max_affected(),
            min_action_cooldown_minutes: default_cooldown(),
            blocked_hours: Vec::new(),
            blocked_weekdays: Vec::new(),
            approval_required_kinds: Vec::new(),
            approval_severity_threshold: default_approval_severity(),
            execution_timeout_seconds: default_execution_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u32,
    /// How long a request waits at one escalation level before moving up.
    #[serde(default = "default_escalation_wait")]
    pub escalation_wait_minutes: u32,
    #[serde(default)]
    pub escalation_chain: Vec<TargetRef>,
    #[serde(default = "default_notify_channel")]
    pub notify_channel: Channel,
}

fn default_expiry_minutes() -> u32 {
    24 * 60
}

fn default_escalation_wait() -> u32 {
    60
}

fn default_notify_channel() -> Channel {
    Channel::Email
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            expiry_minutes: default_expiry_minutes(),
            escalation_wait_minutes: default_escalation_wait(),
            escalation_chain: Vec::new(),
            notify_channel: default_notify_channel(),
        }
    }
}

// ---------------------------------------------------------------------------
// DetectionRules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRules {
    /// Signals of one type needed before a pattern is reported.
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: u32,
    /// Occurrence counts at which severity is raised to medium / high / critical.
    #[serde(default = "default_severity_thresholds")]
    pub severity_thresholds: [u32; 3],
    /// Evidence weight at which confidence from volume reaches ~63%.
    #[serde(default = "default_evidence_scale")]
    pub evidence_scale: f64,
    /// Extra distinct entities at which corroboration confidence reaches ~63%.
    #[serde(default = "default_corroboration_scale")]
    pub corroboration_scale: f64,
    #[serde(default = "default_min_recommendation")]
    pub min_recommendation_confidence: f64,
    #[serde(default = "default_window_minutes")]
    pub default_window_minutes: u32,
}

fn default_min_occurrences() -> u32 {
    3
}

fn default_severity_thresholds() -> [u32; 3] {
    [5, 10, 20]
}

fn default_evidence_scale() -> f64 {
    5.0
}

fn default_corroboration_scale() -> f64 {
    3.0
}

fn default_min_recommendation() -> f64 {
    0.6
}

fn default_window_minutes() -> u32 {
    24 * 60
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            min_occurrences: default_min_occurrences(),
            severity_thresholds: default_severity_thresholds(),
            evidence_scale: default_evidence_scale(),
            corroboration_scale: default_corroboration_scale(),
            min_recommendation_confidence: default_min_recommendation(),
            default_window_minutes: default_window_minutes(),
        }
    }
}

// ---------------------------------------------------------------------------
// LearningConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Finished executions needed before a pairing is judged.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_new_mapping_rate")]
    pub new_mapping_min_success_rate: f64,
    #[serde(default = "default_weak_mapping")]
    pub weak_mapping_threshold: f64,
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,
}

fn default_min_samples() -> u32 {
    3
}

fn default_learning_rate() -> f64 {
    0.3
}

fn default_new_mapping_rate() -> f64 {
    0.6
}

fn default_weak_mapping() -> f64 {
    0.3
}

fn default_window_days() -> u32 {
    30
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            learning_rate: default_learning_rate(),
            new_mapping_min_success_rate: default_new_mapping_rate(),
            weak_mapping_threshold: default_weak_mapping(),
            default_window_days: default_window_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Total attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: JobConcurrency,
    /// Jobs or executions left `running` longer than this are recovered on startup.
    #[serde(default = "default_stale_minutes")]
    pub stale_running_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConcurrency {
    pub pattern_scan: usize,
    pub action_execution: usize,
    pub approval_maintenance: usize,
    pub learning_analysis: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_concurrency() -> JobConcurrency {
    JobConcurrency {
        pattern_scan: 1,
        action_execution: 4,
        approval_maintenance: 1,
        learning_analysis: 1,
    }
}

fn default_stale_minutes() -> u32 {
    30
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            concurrency: default_concurrency(),
            stale_running_minutes: default_stale_minutes(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub safety: SafetyPolicy,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default)]
    pub detection: DetectionRules,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub jobs: JobPolicy,
    /// Per-organization safety overrides. Replaces `safety` wholesale.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub organizations: BTreeMap<String, SafetyPolicy>,
}

impl EngineConfig {
    pub fn safety_for(&self, organization_id: &str) -> &SafetyPolicy {
        self.organizations
            .get(organization_id)
            .unwrap_or(&self.safety)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(HealError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let policies = std::iter::once(("safety".to_string(), &self.safety)).chain(
            self.organizations
                .iter()
                .map(|(org, p)| (format!("organizations.{org}"), p)),
        );
        for (scope, policy) in policies {
            validate_safety(&scope, policy, &mut warnings);
        }

        if self.approval.escalation_chain.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "approval.escalation_chain is empty: approval requests will expire \
                          unanswered after the first escalation wait"
                    .to_string(),
            });
        }
        if !self.approval.notify_channel.is_personal() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "approval.notify_channel '{}' cannot reach a person",
                    self.approval.notify_channel
                ),
            });
        }
        if self.approval.escalation_wait_minutes >= self.approval.expiry_minutes {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "approval.escalation_wait_minutes >= expiry_minutes: requests expire \
                          before they ever escalate"
                    .to_string(),
            });
        }

        let [m, h, c] = self.detection.severity_thresholds;
        if !(m <= h && h <= c) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "detection.severity_thresholds must be non-decreasing, got [{m}, {h}, {c}]"
                ),
            });
        }
        if self.detection.evidence_scale <= 0.0 || self.detection.corroboration_scale <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "detection scales must be positive".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.learning.learning_rate) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "learning.learning_rate must be within [0, 1], got {}",
                    self.learning.learning_rate
                ),
            });
        }

        if self.jobs.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "jobs.max_attempts must be at least 1".to_string(),
            });
        }

        warnings
    }
}

fn validate_safety(scope: &str, policy: &SafetyPolicy, warnings: &mut Vec<ConfigWarning>) {
    if policy.max_concurrent_executions == 0 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            message: format!("{scope}.max_concurrent_executions is 0: every action will be blocked"),
        });
    }
    if policy.max_actions_per_hour == 0 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            message: format!("{scope}.max_actions_per_hour is 0: every action will be blocked"),
        });
    }
    if let Some(hour) = policy.blocked_hours.iter().find(|h| **h > 23) {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!("{scope}.blocked_hours contains {hour}: hours must be 0-23"),
        });
    }
    if policy.blocked_hours.len() >= 24 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            message: format!("{scope}.blocked_hours covers the whole day"),
        });
    }
    if policy.execution_timeout_seconds == 0 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!("{scope}.execution_timeout_seconds must be positive"),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.safety.max_actions_per_hour, 20);
        assert_eq!(cfg.safety.approval_severity_threshold, Some(Severity::Critical));
        assert_eq!(cfg.jobs.max_attempts, 3);
        assert_eq!(cfg.detection.severity_thresholds, [5, 10, 20]);
    }

    #[test]
    fn org_override_replaces_default_policy() {
        let yaml = r#"
safety:
  max_actions_per_hour: 10
organizations:
  org-1:
    max_actions_per_hour: 5
    max_concurrent_executions: 2
"#;
        let cfg: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.safety_for("org-1").max_actions_per_hour, 5);
        assert_eq!(cfg.safety_for("org-1").max_concurrent_executions, 2);
        assert_eq!(cfg.safety_for("org-2").max_actions_per_hour, 10);
    }

    #[test]
    fn blocked_weekdays_parse_from_names() {
        let yaml = "safety:\n  blocked_weekdays: [Sat, Sun]\n  blocked_hours: [0, 1, 2]\n";
        let cfg: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.safety.blocked_weekdays, vec![Weekday::Sat, Weekday::Sun]);
        assert_eq!(cfg.safety.blocked_hours, vec![0, 1, 2]);
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, HealError::NotInitialized));
    }

    #[test]
    fn save_then_load_preserves_policy() {
        let dir = TempDir::new().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.environment = Environment::Production;
        cfg.safety.min_action_cooldown_minutes = 42;
        cfg.save(dir.path()).unwrap();

        let loaded = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.environment, Environment::Production);
        assert_eq!(loaded.safety.min_action_cooldown_minutes, 42);
    }

    #[test]
    fn validate_flags_bad_hours_and_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.safety.blocked_hours = vec![3, 25];
        cfg.detection.severity_thresholds = [10, 5, 20];
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("blocked_hours contains 25")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("severity_thresholds must be non-decreasing")));
    }

    #[test]
    fn validate_warns_on_empty_escalation_chain() {
        let warnings = EngineConfig::default().validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("escalation_chain")));
        assert!(!warnings.iter().any(|w| w.level == WarnLevel::Error));
    }
}
