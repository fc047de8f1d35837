//! Executor registry: one [`ActionExecutor`] per [`ActionKind`].
//!
//! The registry is built once at startup and is read-only afterwards. An
//! action kind with no registered executor is a configuration error reported
//! before gating.

pub mod escalation;
pub mod messaging;
pub mod notify;
pub mod redistribute;
pub mod reminder;
pub mod retry;
pub mod webhook;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionConfig, AutomatedAction};
use crate::adapters::{Recipient, Services};
use crate::audit::{AuditAction, AuditTrail};
use crate::config::Environment;
use crate::error::{HealError, Result};
use crate::execution::{Change, ExecutionOutcome, RollbackData};
use crate::pattern::DetectedPattern;
use crate::store::EngineDb;
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

/// Side effects performed so far, shared with the engine so they survive a
/// timeout that drops the executor future.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog(Arc<Mutex<Vec<Change>>>);

impl ChangeLog {
    pub fn push(&self, change: Change) {
        if let Ok(mut changes) = self.0.lock() {
            changes.push(change);
        }
    }

    pub fn snapshot(&self) -> Vec<Change> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Everything an executor may touch for one execution.
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub action: AutomatedAction,
    pub pattern: Option<DetectedPattern>,
    pub dry_run: bool,
    pub now: DateTime<Utc>,
    pub performed_by: String,
    pub services: Services,
    pub store: Arc<EngineDb>,
    pub audit: AuditTrail,
    pub changes: ChangeLog,
}

impl ExecutionContext {
    pub fn organization_id(&self) -> &str {
        &self.action.organization_id
    }

    /// Template variables for this execution, optionally for one recipient.
    pub fn vars(&self, recipient: Option<&Recipient>) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("organization".into(), self.action.organization_id.clone());
        vars.insert("action.name".into(), self.action.name.clone());
        vars.insert("execution.id".into(), self.execution_id.to_string());
        if let Some(p) = &self.pattern {
            vars.insert("pattern.type".into(), p.pattern_type.clone());
            vars.insert("pattern.severity".into(), p.severity.to_string());
            vars.insert("pattern.confidence".into(), format!("{:.2}", p.confidence));
            vars.insert("pattern.occurrences".into(), p.occurrences.to_string());
            vars.insert("pattern.description".into(), p.description.clone());
        }
        if let Some(r) = recipient {
            vars.insert("recipient.name".into(), r.name.clone());
            vars.insert("recipient.id".into(), r.id.clone());
        }
        vars
    }

    /// Audit a side effect before it is performed.
    pub fn record_effect(
        &self,
        entity_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        let mut details = details;
        if let serde_json::Value::Object(map) = &mut details {
            map.insert("execution_id".into(), self.execution_id.to_string().into());
        }
        self.audit.log(
            self.organization_id(),
            AuditAction::ActionExecuted,
            entity_type,
            entity_id,
            &self.performed_by,
            details,
            self.dry_run,
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn can_rollback(&self) -> bool {
        false
    }

    fn validate(&self, config: &ActionConfig, environment: Environment) -> ValidationReport {
        let mut errors = Vec::new();
        if config.kind() != self.kind() {
            errors.push(format!(
                "{} executor cannot run a {} configuration",
                self.kind(),
                config.kind()
            ));
        }
        errors.extend(config.validate(environment));
        ValidationReport::from_errors(errors)
    }

    /// Perform the action. Each side effect is audited through
    /// [`ExecutionContext::record_effect`] first and pushed to
    /// `ctx.changes` once it has happened. An `Err` fails the execution with
    /// whatever changes were pushed.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome>;

    /// Undo a completed execution. Returns the compensating changes.
    async fn rollback(&self, _ctx: &ExecutionContext, _data: &RollbackData) -> Result<Vec<Change>> {
        Err(HealError::RollbackUnsupported(self.kind().to_string()))
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Box<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six built-in kinds.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        r.register(Box::new(reminder::ReminderExecutor));
        r.register(Box::new(escalation::EscalationExecutor));
        r.register(Box::new(retry::RetryExecutor));
        r.register(Box::new(redistribute::RedistributeExecutor));
        r.register(Box::new(notify::NotifyExecutor));
        r.register(Box::new(webhook::WebhookExecutor));
        r
    }

    /// Replaces any executor already registered for the same kind.
    pub fn register(&mut self, executor: Box<dyn ActionExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: ActionKind) -> Result<&dyn ActionExecutor> {
        self.executors
            .get(&kind)
            .map(|e| e.as_ref())
            .ok_or_else(|| HealError::UnknownActionKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Kind agreement plus the executor's own configuration rules.
    pub fn validate(&self, action: &AutomatedAction, environment: Environment) -> ValidationReport {
        let executor = match self.get(action.action_type) {
            Ok(e) => e,
            Err(e) => return ValidationReport::from_errors(vec![e.to_string()]),
        };
        let mut errors = Vec::new();
        if action.action_type != action.action_config.kind() {
            errors.push(format!(
                "action_type '{}' does not match action_config kind '{}'",
                action.action_type,
                action.action_config.kind()
            ));
        }
        errors.extend(executor.validate(&action.action_config, environment).errors);
        errors.dedup();
        ValidationReport::from_errors(errors)
    }
}
