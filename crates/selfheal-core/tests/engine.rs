//! End-to-end engine scenarios over in-memory adapters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use selfheal_core::action::{
    ActionCatalog, ActionConfig, AutomatedAction, NotifyConfig, RedistributeConfig, ReminderConfig,
    TriggerConfig, WebhookConfig,
};
use selfheal_core::adapters::http::WebhookClient;
use selfheal_core::adapters::memory::{
    MemoryDirectory, MemoryOutbox, MemorySignals, MemoryWorkload, ScriptedOperations,
};
use selfheal_core::adapters::{DeliveryRouter, Recipient, Services, WorkItem};
use selfheal_core::approval::{ApprovalStatus, Decision};
use selfheal_core::audit::{AuditAction, AuditFilter};
use selfheal_core::config::EngineConfig;
use selfheal_core::execution::{ActionExecution, Change, ExecutionOutcome, ExecutionStatus};
use selfheal_core::executor::{ActionExecutor, ExecutionContext, ExecutorRegistry};
use selfheal_core::pattern::ActivitySignal;
use selfheal_core::store::EngineDb;
use selfheal_core::types::{
    ActionKind, Channel, EntityRef, Severity, TargetRef, TriggerType, TriggeredBy,
};
use selfheal_core::{Engine, ExecuteRequest, HealError, ScanRequest};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    engine: Engine,
    services: Services,
    email: Arc<MemoryOutbox>,
    workload: Arc<MemoryWorkload>,
    signals: Arc<MemorySignals>,
}

fn person(id: &str, roles: &[&str]) -> Recipient {
    Recipient {
        id: id.into(),
        name: format!("Person {id}"),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        teams: vec![],
        pools: vec![],
        active: true,
        absent: false,
        addresses: BTreeMap::from([(Channel::Email, format!("{id}@example.com"))]),
    }
}

fn item(id: &str, assignee: &str) -> WorkItem {
    WorkItem {
        id: id.into(),
        organization_id: "org-1".into(),
        title: format!("Item {id}"),
        assignee: assignee.into(),
    }
}

/// Cooldown off so scenarios can run an action more than once.
fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.safety.min_action_cooldown_minutes = 0;
    config
}

struct Setup {
    config: EngineConfig,
    actions: Vec<AutomatedAction>,
    email: MemoryOutbox,
    items: Vec<WorkItem>,
    registry: ExecutorRegistry,
}

impl Setup {
    fn new(actions: Vec<AutomatedAction>) -> Self {
        Self {
            config: config(),
            actions,
            email: MemoryOutbox::new(Channel::Email),
            items: vec![],
            registry: ExecutorRegistry::builtin(),
        }
    }

    fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EngineDb::open(&dir.path().join("engine.redb")).unwrap());
        let email = Arc::new(self.email);
        let workload = Arc::new(MemoryWorkload::new(self.items));
        let signals = Arc::new(MemorySignals::default());
        let services = Services {
            signals: signals.clone(),
            directory: Arc::new(MemoryDirectory::new(vec![
                person("u-1", &["lead"]),
                person("u-2", &["lead"]),
                person("u-3", &["director"]),
            ])),
            delivery: DeliveryRouter::new().with(email.clone()),
            workload: workload.clone(),
            operations: Arc::new(ScriptedOperations::new(vec![])),
            http: WebhookClient::new(Duration::from_secs(5)).unwrap(),
        };
        let engine = Engine::new(
            self.config,
            ActionCatalog::new(self.actions),
            store,
            self.registry,
            services.clone(),
        );
        Harness {
            _dir: dir,
            engine,
            services,
            email,
            workload,
            signals,
        }
    }
}

fn action(id: &str, config: ActionConfig) -> AutomatedAction {
    AutomatedAction {
        id: id.into(),
        organization_id: "org-1".into(),
        name: format!("Action {id}"),
        trigger_type: TriggerType::Pattern,
        trigger_config: TriggerConfig::default(),
        action_type: config.kind(),
        action_config: config,
        requires_approval: false,
        is_active: true,
        timeout_seconds: None,
    }
}

fn notify(id: &str) -> AutomatedAction {
    action(
        id,
        ActionConfig::Notify(NotifyConfig {
            recipients: vec![TargetRef::Role { name: "lead".into() }],
            message_template: "{{action.name}} for {{recipient.name}}".into(),
            channel: Channel::Email,
            subject: None,
        }),
    )
}

fn redistribute(id: &str) -> AutomatedAction {
    action(
        id,
        ActionConfig::Redistribute(RedistributeConfig {
            from_assignee: "u-1".into(),
            to_assignee: "u-2".into(),
            item_ids: vec![],
            max_items: None,
        }),
    )
}

fn signal(kind: &str, entity: &str) -> ActivitySignal {
    ActivitySignal {
        id: Uuid::new_v4().to_string(),
        organization_id: "org-1".into(),
        kind: kind.into(),
        entity: EntityRef {
            id: entity.into(),
            entity_type: "task".into(),
            name: entity.to_uppercase(),
        },
        severity: Severity::Low,
        weight: 1.0,
        occurred_at: Utc::now() - chrono::Duration::minutes(5),
        details: serde_json::Value::Null,
    }
}

/// Scan three overdue signals and return the one pattern they form.
async fn detect_overdue(h: &Harness) -> Uuid {
    for e in ["t-1", "t-2", "t-3"] {
        h.signals.push(signal("overdue_task", e)).unwrap();
    }
    let report = h
        .engine
        .scan(ScanRequest {
            organization_id: "org-1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.patterns.len(), 1);
    report.patterns[0].id
}

// ---------------------------------------------------------------------------
// Safety gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_submissions_respect_the_concurrency_limit() {
    let mut setup = Setup::new(vec![notify("a-1"), notify("a-2"), notify("a-3")]);
    setup.config.safety.max_concurrent_executions = 2;
    setup.email = MemoryOutbox::slow(Channel::Email, Duration::from_millis(300));
    let h = setup.build();

    let results = futures::future::join_all(["a-1", "a-2", "a-3"].map(|id| {
        h.engine
            .execute(ExecuteRequest::manual("org-1", id))
    }))
    .await;

    let statuses: Vec<ExecutionStatus> = results
        .iter()
        .map(|r| r.as_ref().unwrap().execution.status)
        .collect();
    let completed = statuses
        .iter()
        .filter(|s| **s == ExecutionStatus::Completed)
        .count();
    let blocked: Vec<_> = results
        .iter()
        .map(|r| &r.as_ref().unwrap().execution)
        .filter(|e| e.status == ExecutionStatus::Blocked)
        .collect();
    assert_eq!(completed, 2, "statuses: {statuses:?}");
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0]
        .blocked_reason
        .as_deref()
        .unwrap()
        .contains("concurrent"));
}

#[tokio::test]
async fn first_failing_check_in_order_is_reported() {
    let mut setup = Setup::new(vec![notify("a-1")]);
    setup.config.safety.max_actions_per_hour = 0;
    setup.config.safety.blocked_hours = (0..24).collect();
    let h = setup.build();

    let summary = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    assert_eq!(summary.execution.status, ExecutionStatus::Blocked);
    let gate = summary.gate.unwrap();
    assert_eq!(gate.blocked_check.as_deref(), Some("rate_limit"));
    assert!(!gate.check("time_window").unwrap().passed, "every check still runs");
    assert!(h.email.sent().is_empty());

    let blocks = h
        .engine
        .audit(
            "org-1",
            &AuditFilter {
                action: Some(AuditAction::SafetyBlock),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(blocks.len(), 1);
}

#[tokio::test]
async fn cooldown_blocks_a_repeat_run() {
    let mut setup = Setup::new(vec![notify("a-1")]);
    setup.config.safety.min_action_cooldown_minutes = 30;
    let h = setup.build();

    let first = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    assert_eq!(first.execution.status, ExecutionStatus::Completed);
    let second = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    assert_eq!(second.execution.status, ExecutionStatus::Blocked);
    assert_eq!(
        second.gate.unwrap().blocked_check.as_deref(),
        Some("cooldown")
    );
}

// ---------------------------------------------------------------------------
// Execution lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resubmitting_an_execution_id_does_not_run_twice() {
    let h = Setup::new(vec![notify("a-1")]).build();
    let id = Uuid::new_v4();
    let mut req = ExecuteRequest::manual("org-1", "a-1");
    req.execution_id = Some(id);

    let first = h.engine.execute(req.clone()).await.unwrap();
    let again = h.engine.execute(req).await.unwrap();
    assert_eq!(first.execution.id, id);
    assert_eq!(again.execution, first.execution);
    assert_eq!(h.email.sent().len(), 2, "one message per lead, sent once");
}

#[tokio::test]
async fn reminder_cap_holds_across_triggers() {
    let mut reminder = action(
        "remind",
        ActionConfig::Reminder(ReminderConfig {
            recipients: vec![TargetRef::Person { id: "u-1".into() }],
            message_template: "Still open: {{pattern.description}}".into(),
            channel: Channel::Email,
            subject: None,
            repeat_interval_minutes: Some(60),
            max_reminders: Some(2),
        }),
    );
    reminder.trigger_config.pattern_types = vec!["overdue_task".into()];
    let h = Setup::new(vec![reminder]).build();
    let pattern_id = detect_overdue(&h).await;

    let mut metrics = Vec::new();
    for _ in 0..3 {
        let mut req = ExecuteRequest::manual("org-1", "remind");
        req.pattern_id = Some(pattern_id);
        let s = h.engine.execute(req).await.unwrap();
        assert_eq!(s.execution.status, ExecutionStatus::Completed);
        metrics.push(s.execution.result.unwrap());
    }

    assert_eq!(h.email.sent().len(), 2);
    assert!(metrics[0].next_run_at.is_some());
    assert!(metrics[1].next_run_at.is_none());
    assert_eq!(metrics[2].metrics["max_reminders_reached"], 1);
    assert!(metrics[2].changes.is_empty());
}

#[tokio::test]
async fn reminder_cut_short_by_timeout_still_counts_toward_the_cap() {
    let mut reminder = action(
        "remind",
        ActionConfig::Reminder(ReminderConfig {
            recipients: vec![TargetRef::Role { name: "lead".into() }],
            message_template: "Still open: {{pattern.description}}".into(),
            channel: Channel::Email,
            subject: None,
            repeat_interval_minutes: Some(60),
            max_reminders: Some(1),
        }),
    );
    reminder.timeout_seconds = Some(1);
    let mut setup = Setup::new(vec![reminder]);
    setup.email = MemoryOutbox::slow(Channel::Email, Duration::from_millis(600));
    let h = setup.build();
    let pattern_id = detect_overdue(&h).await;

    let mut runs = Vec::new();
    for _ in 0..3 {
        let mut req = ExecuteRequest::manual("org-1", "remind");
        req.pattern_id = Some(pattern_id);
        runs.push(h.engine.execute(req).await.unwrap().execution);
    }

    assert_eq!(runs[0].status, ExecutionStatus::Failed);
    assert!(runs[0].error_message.as_deref().unwrap().contains("timed out"));
    for later in &runs[1..] {
        assert_eq!(later.status, ExecutionStatus::Completed);
        assert_eq!(later.result.as_ref().unwrap().metrics["max_reminders_reached"], 1);
    }
    assert_eq!(h.email.sent().len(), 1, "only the delivery before the timeout");
}

#[tokio::test]
async fn concurrent_rollbacks_undo_the_execution_once() {
    let mut setup = Setup::new(vec![redistribute("rebalance")]);
    setup.items = vec![item("w-1", "u-1"), item("w-2", "u-1")];
    let h = setup.build();
    let done = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "rebalance"))
        .await
        .unwrap();
    let id = done.execution.id;

    let (a, b) = tokio::join!(h.engine.rollback(id, "ops"), h.engine.rollback(id, "ops"));
    let (ok, err): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(|r| r.is_ok());
    assert_eq!(ok.len(), 1);
    assert!(matches!(
        err[0].as_ref().unwrap_err(),
        HealError::InvalidTransition { .. }
    ));
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-1"));
    assert_eq!(h.workload.assignee_of("w-2").as_deref(), Some("u-1"));

    let rolled_back = h
        .engine
        .audit(
            "org-1",
            &AuditFilter {
                action: Some(AuditAction::ActionRolledBack),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(rolled_back.len(), 1);
}

#[tokio::test]
async fn redistribute_rolls_back_to_original_assignee() {
    let mut setup = Setup::new(vec![redistribute("rebalance")]);
    setup.items = vec![item("w-1", "u-1"), item("w-2", "u-1"), item("w-3", "u-3")];
    let h = setup.build();

    let done = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "rebalance"))
        .await
        .unwrap();
    assert_eq!(done.execution.status, ExecutionStatus::Completed);
    assert_eq!(done.execution.changes().len(), 2);
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-2"));

    let back = h.engine.rollback(done.execution.id, "ops").await.unwrap();
    assert_eq!(back.execution.status, ExecutionStatus::RolledBack);
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-1"));
    assert_eq!(h.workload.assignee_of("w-2").as_deref(), Some("u-1"));
    assert_eq!(h.workload.assignee_of("w-3").as_deref(), Some("u-3"));

    let err = h.engine.rollback(done.execution.id, "ops").await.unwrap_err();
    assert!(matches!(err, HealError::InvalidTransition { .. }));
}

/// Performs `ok` of `total` changes, then fails.
struct FlakyBatch {
    ok: usize,
    total: usize,
}

#[async_trait]
impl ActionExecutor for FlakyBatch {
    fn kind(&self) -> ActionKind {
        ActionKind::Notify
    }

    async fn execute(&self, ctx: &ExecutionContext) -> selfheal_core::Result<ExecutionOutcome> {
        for i in 0..self.total {
            let id = format!("e-{i}");
            ctx.record_effect("entity", &id, json!({}))?;
            if i == self.ok {
                return Err(HealError::TargetUnavailable(id));
            }
            ctx.changes.push(Change {
                entity_type: "entity".into(),
                entity_id: id,
                change_type: "touched".into(),
                before: None,
                after: None,
            });
        }
        Ok(ExecutionOutcome::succeeded(ctx.changes.snapshot()))
    }
}

#[tokio::test]
async fn partial_failure_keeps_changes_already_made() {
    let mut setup = Setup::new(vec![notify("batch")]);
    setup.registry.register(Box::new(FlakyBatch { ok: 2, total: 5 }));
    let h = setup.build();

    let s = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "batch"))
        .await
        .unwrap();
    assert_eq!(s.execution.status, ExecutionStatus::Failed);
    let result = s.execution.result.unwrap();
    assert_eq!(result.changes.len(), 2);
    assert_eq!(result.affected_entities, vec!["e-0", "e-1"]);
    assert!(s.execution.error_message.unwrap().contains("e-2"));

    // The failed attempt was audited before it was tried.
    let executed = h
        .engine
        .audit(
            "org-1",
            &AuditFilter {
                action: Some(AuditAction::ActionExecuted),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(executed.len(), 3);
}

#[tokio::test]
async fn timeout_fails_the_execution_but_keeps_partial_changes() {
    let mut slow = notify("slow");
    slow.timeout_seconds = Some(1);
    let mut setup = Setup::new(vec![slow]);
    setup.email = MemoryOutbox::slow(Channel::Email, Duration::from_millis(700));
    let h = setup.build();

    let s = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "slow"))
        .await
        .unwrap();
    assert_eq!(s.execution.status, ExecutionStatus::Failed);
    assert!(s.execution.error_message.unwrap().contains("timed out"));
    assert_eq!(s.execution.result.unwrap().changes.len(), 1);
}

#[tokio::test]
async fn transport_errors_persist_a_failed_execution_and_surface_for_retry() {
    let mut setup = Setup::new(vec![notify("a-1")]);
    setup.email = MemoryOutbox::failing_after(Channel::Email, 0);
    let h = setup.build();

    let err = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let executions = h.engine.executions(Some("org-1")).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn unregistered_kind_is_rejected_before_gating() {
    let mut setup = Setup::new(vec![action(
        "hook",
        ActionConfig::Custom(WebhookConfig {
            url: "https://hooks.example.com/heal".into(),
            headers: BTreeMap::new(),
            payload_template: None,
        }),
    )]);
    setup.registry = ExecutorRegistry::new();
    let h = setup.build();

    let err = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "hook"))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::UnknownActionKind(_)));
    assert!(h.engine.executions(None).unwrap().is_empty());
    let failed = h
        .engine
        .audit(
            "org-1",
            &AuditFilter {
                action: Some(AuditAction::ActionFailed),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn recovery_fails_executions_left_running() {
    let h = Setup::new(vec![notify("a-1")]).build();
    let long_ago = Utc::now() - chrono::Duration::hours(2);
    let mut stuck = ActionExecution::new(
        None,
        "a-1",
        "org-1",
        ActionKind::Notify,
        TriggeredBy::Manual,
        None,
        false,
        long_ago,
    );
    stuck.transition(ExecutionStatus::Gating, long_ago).unwrap();
    stuck.transition(ExecutionStatus::Executing, long_ago).unwrap();
    h.engine.store().put_execution(&stuck).unwrap();

    let fresh = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();

    let recovered = h.engine.recover(Duration::from_secs(30 * 60)).unwrap();
    assert_eq!(recovered, vec![stuck.id]);
    let after = h.engine.execution(stuck.id).unwrap();
    assert_eq!(after.status, ExecutionStatus::Failed);
    assert!(after.error_message.unwrap().contains("interrupted"));
    assert_eq!(
        h.engine.execution(fresh.execution.id).unwrap().status,
        ExecutionStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_simulates_without_side_effects_or_counting() {
    let mut setup = Setup::new(vec![redistribute("rebalance")]);
    setup.config.safety.min_action_cooldown_minutes = 30;
    setup.items = vec![item("w-1", "u-1")];
    let h = setup.build();

    let mut req = ExecuteRequest::manual("org-1", "rebalance");
    req.dry_run = true;
    let dry = h.engine.execute(req).await.unwrap();
    assert_eq!(dry.execution.status, ExecutionStatus::Completed);
    assert!(dry.execution.dry_run);
    assert!(dry.execution.changes().is_empty());
    assert!(dry.execution.rollback_data.is_none());
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-1"));

    let entries = h.engine.audit("org-1", &AuditFilter::default()).unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.simulated));

    // The simulation did not start the cooldown.
    let real = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "rebalance"))
        .await
        .unwrap();
    assert_eq!(real.execution.status, ExecutionStatus::Completed);
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-2"));
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rescanning_the_same_signals_yields_the_same_evidence() {
    let h = Setup::new(vec![]).build();
    for e in ["t-1", "t-2", "t-2", "t-3"] {
        h.signals.push(signal("overdue_task", e)).unwrap();
    }
    let req = ScanRequest {
        organization_id: "org-1".into(),
        ..Default::default()
    };
    let first = h.engine.scan(req.clone()).await.unwrap();
    let second = h.engine.scan(req).await.unwrap();
    assert_eq!(first.patterns.len(), 1);
    assert_eq!(second.patterns.len(), 1);
    assert!(first.patterns[0].same_evidence(&second.patterns[0]));
    assert_ne!(first.patterns[0].id, second.patterns[0].id);
    assert_eq!(first.patterns[0].affected_entities.len(), 3);
}

#[tokio::test]
async fn auto_execute_runs_actions_whose_trigger_matches() {
    let mut matching = notify("on-overdue");
    matching.trigger_config.pattern_types = vec!["overdue_task".into()];
    let mut other = notify("on-stalled");
    other.trigger_config.pattern_types = vec!["stalled_work".into()];
    let h = Setup::new(vec![matching, other]).build();
    for e in ["t-1", "t-2", "t-3"] {
        h.signals.push(signal("overdue_task", e)).unwrap();
    }

    let report = h
        .engine
        .scan(ScanRequest {
            organization_id: "org-1".into(),
            auto_execute: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.executions.len(), 1);
    let e = &report.executions[0].execution;
    assert_eq!(e.action_id, "on-overdue");
    assert_eq!(e.pattern_id, Some(report.patterns[0].id));
    assert_eq!(e.status, ExecutionStatus::Completed);
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

fn gated(mut a: AutomatedAction) -> AutomatedAction {
    a.requires_approval = true;
    a
}

#[tokio::test]
async fn approved_execution_runs_after_regating() {
    let mut setup = Setup::new(vec![gated(redistribute("rebalance"))]);
    setup.config.approval.escalation_chain = vec![TargetRef::Role {
        name: "director".into(),
    }];
    setup.items = vec![item("w-1", "u-1")];
    let h = setup.build();

    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "rebalance"))
        .await
        .unwrap();
    assert_eq!(pending.execution.status, ExecutionStatus::AwaitingApproval);
    let approval = pending.approval.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(h.email.sent()[0].0, "u-3", "director is asked first");
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-1"));

    let done = h
        .engine
        .decide_approval(approval.id, Decision::Approve, "u-3", None)
        .await
        .unwrap();
    assert_eq!(done.execution.status, ExecutionStatus::Completed);
    assert_eq!(h.workload.assignee_of("w-1").as_deref(), Some("u-2"));
    assert_eq!(
        h.engine.approvals(Some("org-1")).unwrap()[0].status,
        ApprovalStatus::Approved
    );
}

#[tokio::test]
async fn rejected_execution_is_blocked() {
    let h = Setup::new(vec![gated(notify("a-1"))]).build();
    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    let id = pending.approval.unwrap().id;

    let s = h
        .engine
        .decide_approval(id, Decision::Reject, "u-3", Some("not now".into()))
        .await
        .unwrap();
    assert_eq!(s.execution.status, ExecutionStatus::Blocked);
    assert!(s.execution.blocked_reason.unwrap().contains("not now"));
    assert!(h.email.sent().is_empty());
}

#[tokio::test]
async fn expired_approval_blocks_the_execution() {
    let mut setup = Setup::new(vec![gated(notify("a-1"))]);
    setup.config.approval.expiry_minutes = 0;
    let h = setup.build();

    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    let execution_id = pending.execution.id;

    let report = h.engine.maintain_approvals("org-1").await.unwrap();
    assert_eq!(report.expired.len(), 1);
    assert_eq!(report.blocked_executions, vec![execution_id]);
    assert_eq!(
        h.engine.execution(execution_id).unwrap().status,
        ExecutionStatus::Blocked
    );

    let err = h
        .engine
        .decide_approval(report.expired[0], Decision::Approve, "u-3", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::ApprovalExpired(_)));
    assert!(h.email.sent().is_empty());
}

#[tokio::test]
async fn awaiting_execution_is_stored_with_its_request() {
    let h = Setup::new(vec![gated(notify("a-1"))]).build();
    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    let approval = pending.approval.unwrap();

    let stored = h.engine.execution(pending.execution.id).unwrap();
    assert_eq!(stored.status, ExecutionStatus::AwaitingApproval);
    assert_eq!(stored.approval_id, Some(approval.id));
    assert_eq!(approval.execution_id, stored.id);
}

#[tokio::test]
async fn approval_that_cannot_start_blocks_the_execution() {
    let h = Setup::new(vec![gated(notify("a-1"))]).build();
    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    let approval_id = pending.approval.unwrap().id;

    // Same database, but a catalog where the action no longer exists.
    let reloaded = Engine::new(
        config(),
        ActionCatalog::new(vec![notify("a-2")]),
        h.engine.store().clone(),
        ExecutorRegistry::builtin(),
        h.services.clone(),
    );
    let err = reloaded
        .decide_approval(approval_id, Decision::Approve, "u-3", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::ActionNotFound(_)));

    let execution = reloaded.execution(pending.execution.id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Blocked);
    assert!(execution.blocked_reason.unwrap().contains("a-1"));
    assert!(h.email.sent().is_empty());
}

#[tokio::test]
async fn approved_run_counts_toward_the_rate_limit_from_approval_time() {
    let mut setup = Setup::new(vec![gated(notify("a-1")), notify("a-2")]);
    setup.config.safety.max_actions_per_hour = 1;
    let h = setup.build();

    let pending = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-1"))
        .await
        .unwrap();
    // Requested two hours ago, approved now.
    let mut waiting = h.engine.execution(pending.execution.id).unwrap();
    waiting.started_at = Utc::now() - chrono::Duration::hours(2);
    h.engine.store().put_execution(&waiting).unwrap();

    let done = h
        .engine
        .decide_approval(pending.approval.unwrap().id, Decision::Approve, "u-3", None)
        .await
        .unwrap();
    assert_eq!(done.execution.status, ExecutionStatus::Completed);

    let next = h
        .engine
        .execute(ExecuteRequest::manual("org-1", "a-2"))
        .await
        .unwrap();
    assert_eq!(next.execution.status, ExecutionStatus::Blocked);
    assert_eq!(next.gate.unwrap().blocked_check.as_deref(), Some("rate_limit"));
}

#[tokio::test]
async fn dry_run_reports_approval_without_opening_one() {
    let h = Setup::new(vec![gated(notify("a-1"))]).build();
    let mut req = ExecuteRequest::manual("org-1", "a-1");
    req.dry_run = true;

    let s = h.engine.execute(req).await.unwrap();
    assert!(s.gate.unwrap().requires_approval);
    assert!(s.approval.is_none());
    assert_eq!(s.execution.status, ExecutionStatus::Completed);
    assert!(h.engine.approvals(None).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn learning_creates_mapping_from_successful_runs() {
    let mut setup = Setup::new(vec![notify("a-1")]);
    setup.config.learning.min_samples = 2;
    let h = setup.build();
    let pattern_id = detect_overdue(&h).await;

    for _ in 0..2 {
        let mut req = ExecuteRequest::manual("org-1", "a-1");
        req.pattern_id = Some(pattern_id);
        h.engine.execute(req).await.unwrap();
    }

    let report = h.engine.analyze("org-1", None).unwrap();
    assert_eq!(report.executions_analyzed, 2);
    assert_eq!(report.new_pattern_mappings.len(), 1);
    assert_eq!(report.new_pattern_mappings[0].pattern_type, "overdue_task");
    assert_eq!(report.new_pattern_mappings[0].action_id, "a-1");
}
