//! The engine facade: one entry point per operation, wiring detector, gate,
//! executors, approvals, audit and learning over a shared store.
//!
//! Gate evaluation for an organization runs inside that organization's lock:
//! counters are read, the gate evaluated and the execution persisted as
//! `executing` before the lock is released. Two near-simultaneous submissions
//! therefore see each other's reservation.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::action::{ActionCatalog, AutomatedAction};
use crate::adapters::Services;
use crate::approval::{ApprovalRequest, ApprovalWorkflow, Decision, MaintenanceReport};
use crate::audit::{AuditAction, AuditEntry, AuditFilter, AuditTrail};
use crate::config::EngineConfig;
use crate::error::{HealError, Result};
use crate::execution::{ActionExecution, ExecutionOutcome, ExecutionStatus};
use crate::executor::{ChangeLog, ExecutionContext, ExecutorRegistry};
use crate::learning::{LearningLoop, LearningReport};
use crate::paths;
use crate::pattern::detector::{PatternDetector, Recommendation};
use crate::pattern::DetectedPattern;
use crate::safety::{self, GateInput, SafetyCheckResult, TargetStatus};
use crate::store::EngineDb;
use crate::types::{TriggerType, TriggeredBy};

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_types: Option<Vec<String>>,
    /// Defaults to `detection.default_window_minutes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_minutes: Option<u32>,
    #[serde(default)]
    pub auto_execute: bool,
    /// Applies to executions started by `auto_execute`.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub organization_id: String,
    pub patterns: Vec<DetectedPattern>,
    pub recommendations: Vec<Recommendation>,
    pub scan_duration_ms: u64,
    pub executions: Vec<ExecutionSummary>,
    /// Auto-executions that returned an error instead of a summary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub organization_id: String,
    pub action_id: String,
    /// Reuse a known id; a second submission with the same id returns the
    /// stored execution instead of running again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<Uuid>,
    pub triggered_by: TriggeredBy,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_performer")]
    pub performed_by: String,
}

fn default_performer() -> String {
    "engine".to_string()
}

impl ExecuteRequest {
    pub fn manual(organization_id: &str, action_id: &str) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            action_id: action_id.to_string(),
            execution_id: None,
            pattern_id: None,
            triggered_by: TriggeredBy::Manual,
            dry_run: false,
            performed_by: default_performer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution: ActionExecution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<SafetyCheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

impl ExecutionSummary {
    fn of(execution: ActionExecution) -> Self {
        Self {
            gate: execution.gate.clone(),
            execution,
            approval: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    catalog: ActionCatalog,
    store: Arc<EngineDb>,
    audit: AuditTrail,
    registry: Arc<ExecutorRegistry>,
    services: Services,
    detector: PatternDetector,
    approvals: ApprovalWorkflow,
    learning: LearningLoop,
    org_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        catalog: ActionCatalog,
        store: Arc<EngineDb>,
        registry: ExecutorRegistry,
        services: Services,
    ) -> Self {
        let audit = AuditTrail::new(store.clone());
        Self {
            detector: PatternDetector::new(config.detection.clone()),
            approvals: ApprovalWorkflow::new(
                store.clone(),
                audit.clone(),
                services.clone(),
                config.approval.clone(),
            ),
            learning: LearningLoop::new(store.clone(), audit.clone(), config.learning.clone()),
            config,
            catalog,
            store,
            audit,
            registry: Arc::new(registry),
            services,
            org_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load config and catalog from a project root and open its database,
    /// with the built-in executors.
    pub fn open(root: &Path, services: Services) -> Result<Self> {
        let config = EngineConfig::load(root)?;
        let catalog = ActionCatalog::load(root)?;
        let store = Arc::new(EngineDb::open(&paths::engine_db_path(root))?);
        Ok(Self::new(
            config,
            catalog,
            store,
            ExecutorRegistry::builtin(),
            services,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<EngineDb> {
        &self.store
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    fn org_lock(&self, organization_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.org_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(organization_id.to_string()).or_default().clone()
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// Detect patterns, persist them and optionally execute every matching
    /// action.
    pub async fn scan(&self, req: ScanRequest) -> Result<ScanReport> {
        let org = req.organization_id.as_str();
        let now = Utc::now();
        let window = req
            .time_window_minutes
            .unwrap_or(self.config.detection.default_window_minutes);
        let mappings = self.store.mappings(org)?;
        let output = self
            .detector
            .detect(
                self.services.signals.as_ref(),
                org,
                req.pattern_types.as_deref(),
                window,
                &mappings,
                now,
            )
            .await?;

        for pattern in &output.patterns {
            self.store.put_pattern(pattern)?;
            self.audit.log(
                org,
                AuditAction::PatternDetected,
                "pattern",
                &pattern.id.to_string(),
                "detector",
                json!({
                    "type": pattern.pattern_type,
                    "severity": pattern.severity,
                    "confidence": pattern.confidence,
                    "occurrences": pattern.occurrences,
                    "affected_entities": pattern.affected_entities.len(),
                }),
                false,
            )?;
        }
        tracing::info!(
            organization = %org,
            patterns = output.patterns.len(),
            recommendations = output.recommendations.len(),
            duration_ms = output.scan_duration_ms,
            "scan complete"
        );

        let mut report = ScanReport {
            organization_id: org.to_string(),
            patterns: output.patterns,
            recommendations: output.recommendations,
            scan_duration_ms: output.scan_duration_ms,
            executions: Vec::new(),
            errors: Vec::new(),
        };
        if !req.auto_execute {
            return Ok(report);
        }

        for (pattern_id, action_id) in self.candidates(org, &report.patterns, &report.recommendations) {
            let request = ExecuteRequest {
                organization_id: org.to_string(),
                action_id: action_id.clone(),
                execution_id: None,
                pattern_id: Some(pattern_id),
                triggered_by: TriggeredBy::Pattern,
                dry_run: req.dry_run,
                performed_by: "detector".to_string(),
            };
            match self.execute(request).await {
                Ok(summary) => report.executions.push(summary),
                Err(e) => {
                    tracing::warn!(action = %action_id, pattern = %pattern_id, error = %e, "auto-execution failed");
                    report.errors.push(format!("{action_id}: {e}"));
                }
            }
        }
        Ok(report)
    }

    /// `(pattern, action)` pairs to run: active pattern-triggered actions whose
    /// trigger matches, plus learned recommendations. Deduplicated, in order.
    fn candidates(
        &self,
        organization_id: &str,
        patterns: &[DetectedPattern],
        recommendations: &[Recommendation],
    ) -> Vec<(Uuid, String)> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for pattern in patterns {
            for action in self.catalog.for_organization(organization_id) {
                if action.is_active
                    && action.trigger_type == TriggerType::Pattern
                    && action.trigger_config.matches(pattern)
                    && seen.insert((pattern.id, action.id.clone()))
                {
                    out.push((pattern.id, action.id.clone()));
                }
            }
        }
        for rec in recommendations {
            let active = self
                .catalog
                .get(organization_id, &rec.action_id)
                .map(|a| a.is_active)
                .unwrap_or(false);
            if active && seen.insert((rec.pattern_id, rec.action_id.clone())) {
                out.push((rec.pattern_id, rec.action_id.clone()));
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Submit one action through the full lifecycle.
    ///
    /// Returns `Err` for problems caught before gating (unknown action or
    /// kind, missing pattern) and for retryable executor errors, after the
    /// failed execution has been persisted. Every other outcome, including
    /// blocked and failed executions, is an `Ok` summary.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecutionSummary> {
        let org = req.organization_id.as_str();
        if let Some(id) = req.execution_id {
            match self.store.get_execution(id) {
                Ok(existing) => return Ok(ExecutionSummary::of(existing)),
                Err(HealError::ExecutionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let action = self.catalog.get(org, &req.action_id)?.clone();
        if !action.is_active {
            return Err(HealError::Configuration(format!(
                "action '{}' is inactive",
                action.id
            )));
        }
        if let Err(e) = self.registry.get(action.action_type) {
            self.audit.log(
                org,
                AuditAction::ActionFailed,
                "action",
                &action.id,
                &req.performed_by,
                json!({"error": e.to_string(), "stage": "validation"}),
                req.dry_run,
            )?;
            return Err(e);
        }
        let pattern = match req.pattern_id {
            Some(id) => {
                let p = self.store.get_pattern(id)?;
                if p.organization_id != org {
                    return Err(HealError::PatternNotFound(id.to_string()));
                }
                Some(p)
            }
            None => None,
        };

        let lock = self.org_lock(org);
        let guard = lock.lock().await;
        let now = Utc::now();
        let mut execution = ActionExecution::new(
            req.execution_id,
            &action.id,
            org,
            action.action_type,
            req.triggered_by,
            req.pattern_id,
            req.dry_run,
            now,
        );
        execution.transition(ExecutionStatus::Gating, now)?;
        let gate = self
            .gate(&action, pattern.as_ref(), false, &mut execution, &req.performed_by)
            .await?;

        if !gate.passed {
            execution.block(gate.blocked_reason.clone().unwrap_or_default(), Utc::now())?;
            self.store.put_execution(&execution)?;
            drop(guard);
            tracing::info!(
                execution = %execution.id,
                action = %action.id,
                check = gate.blocked_check.as_deref().unwrap_or(""),
                "execution blocked"
            );
            return Ok(ExecutionSummary::of(execution));
        }

        if gate.requires_approval && !req.dry_run {
            let approval = match self.approvals.open(&mut execution, Utc::now()).await {
                Ok(a) => a,
                Err(e) if execution.status == ExecutionStatus::Gating => {
                    execution.block(format!("approval request could not be opened: {e}"), Utc::now())?;
                    self.store.put_execution(&execution)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            drop(guard);
            return Ok(ExecutionSummary {
                gate: Some(gate),
                execution,
                approval: Some(approval),
            });
        }

        execution.transition(ExecutionStatus::Executing, Utc::now())?;
        self.store.put_execution(&execution)?;
        drop(guard);

        self.run(execution, action, pattern, &req.performed_by).await
    }

    /// Evaluate the gate against fresh counters, attach the result to the
    /// execution and audit it.
    async fn gate(
        &self,
        action: &AutomatedAction,
        pattern: Option<&DetectedPattern>,
        approval_granted: bool,
        execution: &mut ActionExecution,
        performed_by: &str,
    ) -> Result<SafetyCheckResult> {
        let org = action.organization_id.as_str();
        let now = Utc::now();
        let counters = self.store.gate_counters(org, &action.id, now)?;
        let mut targets = Vec::new();
        for target in action.action_config.targets() {
            let (available, total) = self.services.target_availability(org, &target).await?;
            targets.push(TargetStatus {
                target,
                available,
                total,
            });
        }
        let input = GateInput {
            action,
            pattern,
            policy: self.config.safety_for(org),
            environment: self.config.environment,
            counters,
            targets,
            approval_granted,
            now,
        };
        let result = safety::evaluate(&input, &self.registry);

        let audit_action = if result.passed {
            AuditAction::SafetyPass
        } else {
            AuditAction::SafetyBlock
        };
        self.audit.log(
            org,
            audit_action,
            "execution",
            &execution.id.to_string(),
            performed_by,
            json!({
                "action_id": action.id,
                "pattern_id": pattern.map(|p| p.id),
                "blocked_check": result.blocked_check,
                "blocked_reason": result.blocked_reason,
                "warnings": result.warnings,
                "requires_approval": result.requires_approval,
            }),
            execution.dry_run,
        )?;
        execution.gate = Some(result.clone());
        Ok(result)
    }

    /// Run the executor for an execution already persisted as `executing`.
    async fn run(
        &self,
        mut execution: ActionExecution,
        action: AutomatedAction,
        pattern: Option<DetectedPattern>,
        performed_by: &str,
    ) -> Result<ExecutionSummary> {
        let org = execution.organization_id.clone();
        let executor = self.registry.get(action.action_type)?;
        let timeout_secs = action
            .timeout_seconds
            .unwrap_or(self.config.safety_for(&org).execution_timeout_seconds);
        self.audit.log(
            &org,
            AuditAction::ActionTriggered,
            "execution",
            &execution.id.to_string(),
            performed_by,
            json!({
                "action_id": action.id,
                "kind": action.action_type,
                "triggered_by": execution.triggered_by,
                "pattern_id": execution.pattern_id,
            }),
            execution.dry_run,
        )?;

        let ctx = ExecutionContext {
            execution_id: execution.id,
            action,
            pattern,
            dry_run: execution.dry_run,
            now: Utc::now(),
            performed_by: performed_by.to_string(),
            services: self.services.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            changes: ChangeLog::default(),
        };

        let mut retryable = None;
        let outcome =
            match tokio::time::timeout(Duration::from_secs(timeout_secs), executor.execute(&ctx)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    let outcome = ExecutionOutcome::failed(ctx.changes.snapshot(), e.to_string());
                    if e.is_retryable() {
                        retryable = Some(e);
                    }
                    outcome
                }
                Err(_) => {
                    tracing::warn!(execution = %execution.id, timeout_secs, "executor timed out");
                    ExecutionOutcome::failed(
                        ctx.changes.snapshot(),
                        HealError::ExecutionTimeout(timeout_secs).to_string(),
                    )
                }
            };

        execution.finish(outcome, Utc::now())?;
        self.store.put_execution(&execution)?;

        let result = execution.result.as_ref();
        let audit_action = if execution.status == ExecutionStatus::Completed {
            AuditAction::ActionCompleted
        } else {
            AuditAction::ActionFailed
        };
        self.audit.log(
            &org,
            audit_action,
            "execution",
            &execution.id.to_string(),
            performed_by,
            json!({
                "action_id": execution.action_id,
                "changes": execution.changes().len(),
                "affected_entities": result.map(|r| r.affected_entities.clone()),
                "metrics": result.map(|r| r.metrics.clone()),
                "error": execution.error_message,
            }),
            execution.dry_run,
        )?;
        tracing::info!(
            execution = %execution.id,
            action = %execution.action_id,
            status = %execution.status,
            changes = execution.changes().len(),
            "execution finished"
        );

        match retryable {
            Some(e) => Err(e),
            None => Ok(ExecutionSummary::of(execution)),
        }
    }

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Apply a human decision. Approval re-runs the gate with the approval
    /// satisfied before the execution may start.
    pub async fn decide_approval(
        &self,
        approval_id: Uuid,
        decision: Decision,
        by: &str,
        reason: Option<String>,
    ) -> Result<ExecutionSummary> {
        let org = self.store.get_approval(approval_id)?.organization_id;
        let lock = self.org_lock(&org);
        let guard = lock.lock().await;

        let request = match self.approvals.decide(approval_id, decision, by, reason.clone(), Utc::now()) {
            Ok(r) => r,
            Err(HealError::ApprovalExpired(id)) => {
                let expired = self.store.get_approval(approval_id)?;
                self.approvals.block_execution(&expired, Utc::now())?;
                return Err(HealError::ApprovalExpired(id));
            }
            Err(e) => return Err(e),
        };

        let mut execution = self.store.get_execution(request.execution_id)?;
        if execution.status != ExecutionStatus::AwaitingApproval {
            return Err(HealError::InvalidTransition {
                from: execution.status.to_string(),
                to: ExecutionStatus::Executing.to_string(),
                reason: format!("execution {} is not awaiting approval", execution.id),
            });
        }

        if decision == Decision::Reject {
            let why = match &reason {
                Some(r) => format!("approval rejected by {by}: {r}"),
                None => format!("approval rejected by {by}"),
            };
            execution.block(why, Utc::now())?;
            self.store.put_execution(&execution)?;
            return Ok(ExecutionSummary {
                approval: Some(request),
                ..ExecutionSummary::of(execution)
            });
        }

        let admitted = match self.admit_approved(&mut execution, by).await {
            Ok(a) => a,
            Err(e) => {
                if execution.status == ExecutionStatus::AwaitingApproval {
                    execution.block(format!("approved by {by} but could not start: {e}"), Utc::now())?;
                    self.store.put_execution(&execution)?;
                    self.audit.log(
                        &org,
                        AuditAction::ActionFailed,
                        "execution",
                        &execution.id.to_string(),
                        by,
                        json!({ "stage": "approval", "error": e.to_string() }),
                        false,
                    )?;
                }
                return Err(e);
            }
        };
        let Some((action, pattern)) = admitted else {
            return Ok(ExecutionSummary {
                approval: Some(request),
                ..ExecutionSummary::of(execution)
            });
        };
        drop(guard);

        let mut summary = self.run(execution, action, pattern, by).await?;
        summary.approval = Some(request);
        Ok(summary)
    }

    /// Re-gate an approved execution. Leaves it `executing` and stored when
    /// the gate passes, `blocked` and stored when it does not.
    async fn admit_approved(
        &self,
        execution: &mut ActionExecution,
        by: &str,
    ) -> Result<Option<(AutomatedAction, Option<DetectedPattern>)>> {
        let action = self
            .catalog
            .get(&execution.organization_id, &execution.action_id)?
            .clone();
        let pattern = match execution.pattern_id {
            Some(id) => Some(self.store.get_pattern(id)?),
            None => None,
        };
        let gate = self.gate(&action, pattern.as_ref(), true, execution, by).await?;
        if !gate.passed {
            execution.block(gate.blocked_reason.clone().unwrap_or_default(), Utc::now())?;
            self.store.put_execution(execution)?;
            return Ok(None);
        }
        execution.transition(ExecutionStatus::Executing, Utc::now())?;
        self.store.put_execution(execution)?;
        Ok(Some((action, pattern)))
    }

    /// Expiry and escalation sweep for one organization.
    pub async fn maintain_approvals(&self, organization_id: &str) -> Result<MaintenanceReport> {
        let lock = self.org_lock(organization_id);
        let _guard = lock.lock().await;
        let report = self.approvals.sweep(organization_id, Utc::now()).await?;
        tracing::info!(
            organization = %organization_id,
            expired = report.expired.len(),
            escalated = report.escalated.len(),
            exhausted = report.exhausted.len(),
            "approval maintenance complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Learning
    // -----------------------------------------------------------------------

    pub fn analyze(&self, organization_id: &str, window_days: Option<u32>) -> Result<LearningReport> {
        let days = window_days.unwrap_or(self.config.learning.default_window_days);
        self.learning.analyze(organization_id, days, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Rollback and recovery
    // -----------------------------------------------------------------------

    /// Undo a completed execution whose executor supports rollback.
    pub async fn rollback(&self, execution_id: Uuid, by: &str) -> Result<ExecutionSummary> {
        let org = self.store.get_execution(execution_id)?.organization_id;
        let lock = self.org_lock(&org);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent rollback may have finished.
        let mut execution = self.store.get_execution(execution_id)?;
        if execution.status != ExecutionStatus::Completed {
            return Err(HealError::InvalidTransition {
                from: execution.status.to_string(),
                to: ExecutionStatus::RolledBack.to_string(),
                reason: "only completed executions can be rolled back".into(),
            });
        }
        let executor = self.registry.get(execution.action_type)?;
        if !executor.can_rollback() {
            return Err(HealError::RollbackUnsupported(execution.action_type.to_string()));
        }
        let Some(data) = execution.rollback_data.clone() else {
            return Err(HealError::RollbackUnsupported(format!(
                "execution {execution_id} captured no rollback data"
            )));
        };

        let action = self.catalog.get(&org, &execution.action_id)?.clone();
        let ctx = ExecutionContext {
            execution_id,
            action,
            pattern: None,
            dry_run: false,
            now: Utc::now(),
            performed_by: by.to_string(),
            services: self.services.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            changes: ChangeLog::default(),
        };
        let changes = executor.rollback(&ctx, &data).await?;

        execution.transition(ExecutionStatus::RolledBack, Utc::now())?;
        self.store.put_execution(&execution)?;
        self.audit.log(
            &org,
            AuditAction::ActionRolledBack,
            "execution",
            &execution_id.to_string(),
            by,
            json!({"changes": changes}),
            false,
        )?;
        tracing::info!(execution = %execution_id, changes = changes.len(), "execution rolled back");
        Ok(ExecutionSummary::of(execution))
    }

    /// Fail executions left `executing` by a crashed process.
    pub fn recover(&self, max_age: Duration) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let mut recovered = Vec::new();
        for mut execution in self.store.stale_executions(max_age, now)? {
            execution.finish(
                ExecutionOutcome::failed(Vec::new(), "interrupted before completion"),
                now,
            )?;
            self.store.put_execution(&execution)?;
            self.audit.log(
                &execution.organization_id,
                AuditAction::ExecutionRecovered,
                "execution",
                &execution.id.to_string(),
                "engine",
                json!({"action_id": execution.action_id}),
                false,
            )?;
            tracing::warn!(execution = %execution.id, "stale execution marked failed");
            recovered.push(execution.id);
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn executions(&self, organization_id: Option<&str>) -> Result<Vec<ActionExecution>> {
        self.store.list_executions(organization_id)
    }

    pub fn execution(&self, id: Uuid) -> Result<ActionExecution> {
        self.store.get_execution(id)
    }

    pub fn approvals(&self, organization_id: Option<&str>) -> Result<Vec<ApprovalRequest>> {
        self.store.list_approvals(organization_id)
    }

    pub fn audit(&self, organization_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(organization_id, filter)
    }
}
