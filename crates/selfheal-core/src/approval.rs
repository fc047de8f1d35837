//! Human sign-off for executions the gate routed to `awaiting_approval`.
//!
//! ```text
//! pending ──(wait elapsed)──▶ escalated ──(wait elapsed)──▶ escalated …
//!    │                            │
//!    ├── approved / rejected ◀────┤
//!    └── expired ◀────────────────┘   (past expires_at, or chain exhausted)
//! ```
//!
//! The maintenance sweep owns expiry and escalation. A human decision is the
//! only other way out of an open request.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::adapters::{Message, Services};
use crate::audit::{AuditAction, AuditTrail};
use crate::config::ApprovalPolicy;
use crate::error::{HealError, Result};
use crate::execution::{ActionExecution, ExecutionStatus};
use crate::store::EngineDb;
use crate::types::TargetRef;

pub const NO_APPROVER_AVAILABLE: &str = "no approver available";

// ---------------------------------------------------------------------------
// ApprovalStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Escalated,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Escalated => "escalated",
        }
    }

    /// Still waiting on a human.
    pub fn is_open(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Escalated)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ApprovalRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub organization_id: String,
    pub action_id: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub escalation_chain: Vec<TargetRef>,
    #[serde(default)]
    pub current_escalation_level: usize,
    /// When the current level started waiting.
    pub level_started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn current_approver(&self) -> Option<&TargetRef> {
        self.escalation_chain.get(self.current_escalation_level)
    }

    fn close(&mut self, status: ApprovalStatus, by: Option<&str>, reason: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.decided_by = by.map(str::to_string);
        self.decided_at = Some(now);
        self.reason = reason;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// What one maintenance sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub organization_id: String,
    pub expired: Vec<Uuid>,
    pub escalated: Vec<Uuid>,
    /// Expired because every level of the chain was tried.
    pub exhausted: Vec<Uuid>,
    /// Executions moved to `blocked` as a result.
    pub blocked_executions: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// ApprovalWorkflow
// ---------------------------------------------------------------------------

pub struct ApprovalWorkflow {
    store: Arc<EngineDb>,
    audit: AuditTrail,
    services: Services,
    policy: ApprovalPolicy,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<EngineDb>, audit: AuditTrail, services: Services, policy: ApprovalPolicy) -> Self {
        Self {
            store,
            audit,
            services,
            policy,
        }
    }

    /// Move a gated execution to `awaiting_approval`, open its request and
    /// notify the first level of the chain.
    ///
    /// The execution and the request are stored in one transaction, so an
    /// execution is never left awaiting a request that does not exist.
    pub async fn open(&self, execution: &mut ActionExecution, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            organization_id: execution.organization_id.clone(),
            action_id: execution.action_id.clone(),
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + Duration::minutes(i64::from(self.policy.expiry_minutes)),
            escalation_chain: self.policy.escalation_chain.clone(),
            current_escalation_level: 0,
            level_started_at: now,
            decided_by: None,
            decided_at: None,
            reason: None,
        };
        execution.transition(ExecutionStatus::AwaitingApproval, now)?;
        execution.approval_id = Some(request.id);
        self.store.put_awaiting_approval(execution, &request)?;
        tracing::info!(
            approval = %request.id,
            execution = %execution.id,
            expires_at = %request.expires_at,
            "approval requested"
        );
        let delivery = self.notify(&request).await;
        self.audit.log(
            &request.organization_id,
            AuditAction::ApprovalRequested,
            "approval_request",
            &request.id.to_string(),
            "engine",
            json!({
                "execution_id": request.execution_id,
                "action_id": request.action_id,
                "expires_at": request.expires_at,
                "level": 0,
                "notified": delivery,
            }),
            false,
        )?;
        Ok(request)
    }

    /// Record a human decision on an open request.
    ///
    /// A request already past `expires_at` is expired instead and the call
    /// fails with `ApprovalExpired`.
    pub fn decide(
        &self,
        id: Uuid,
        decision: Decision,
        by: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let mut request = self.store.get_approval(id)?;
        if request.status == ApprovalStatus::Expired {
            return Err(if request.reason.as_deref() == Some(NO_APPROVER_AVAILABLE) {
                HealError::ApprovalExhausted(id.to_string())
            } else {
                HealError::ApprovalExpired(id.to_string())
            });
        }
        if !request.status.is_open() {
            return Err(HealError::InvalidTransition {
                from: request.status.to_string(),
                to: match decision {
                    Decision::Approve => ApprovalStatus::Approved.to_string(),
                    Decision::Reject => ApprovalStatus::Rejected.to_string(),
                },
                reason: format!("approval {id} is already closed"),
            });
        }
        if now >= request.expires_at {
            self.expire(&mut request, "approval expired before a decision", false, now)?;
            return Err(HealError::ApprovalExpired(id.to_string()));
        }

        let (status, audit_action) = match decision {
            Decision::Approve => (ApprovalStatus::Approved, AuditAction::ApprovalGranted),
            Decision::Reject => (ApprovalStatus::Rejected, AuditAction::ApprovalRejected),
        };
        request.close(status, Some(by), reason.clone(), now);
        self.store.put_approval(&request)?;
        tracing::info!(approval = %id, decision = %status, by, "approval decided");
        self.audit.log(
            &request.organization_id,
            audit_action,
            "approval_request",
            &id.to_string(),
            by,
            json!({"execution_id": request.execution_id, "reason": reason}),
            false,
        )?;
        Ok(request)
    }

    /// Expire overdue requests and escalate stale ones for one organization.
    pub async fn sweep(&self, organization_id: &str, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let wait = Duration::minutes(i64::from(self.policy.escalation_wait_minutes));
        let mut report = MaintenanceReport {
            organization_id: organization_id.to_string(),
            ..Default::default()
        };

        for mut request in self.store.open_approvals(organization_id)? {
            if now >= request.expires_at {
                self.expire(&mut request, "approval expired", false, now)?;
                report.expired.push(request.id);
                report.blocked_executions.extend(self.block_execution(&request, now)?);
                continue;
            }
            if now - request.level_started_at < wait {
                continue;
            }

            let next = request.current_escalation_level + 1;
            if next >= request.escalation_chain.len() {
                self.expire(&mut request, NO_APPROVER_AVAILABLE, true, now)?;
                report.exhausted.push(request.id);
                report.blocked_executions.extend(self.block_execution(&request, now)?);
                continue;
            }

            request.current_escalation_level = next;
            request.level_started_at = now;
            request.status = ApprovalStatus::Escalated;
            self.store.put_approval(&request)?;
            tracing::info!(approval = %request.id, level = next, "approval escalated");
            let delivery = self.notify(&request).await;
            self.audit.log(
                organization_id,
                AuditAction::ApprovalEscalated,
                "approval_request",
                &request.id.to_string(),
                "engine",
                json!({
                    "execution_id": request.execution_id,
                    "level": next,
                    "approver": request.current_approver().map(ToString::to_string),
                    "notified": delivery,
                }),
                false,
            )?;
            report.escalated.push(request.id);
        }
        Ok(report)
    }

    /// Move the owning execution to `blocked` with the request's reason.
    ///
    /// Returns the execution id if it was still awaiting approval.
    pub fn block_execution(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        let mut execution = self.store.get_execution(request.execution_id)?;
        if execution.status != ExecutionStatus::AwaitingApproval {
            return Ok(None);
        }
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| format!("approval {}", request.status));
        execution.block(reason, now)?;
        self.store.put_execution(&execution)?;
        tracing::info!(
            execution = %execution.id,
            approval = %request.id,
            status = %request.status,
            "execution blocked after approval closed"
        );
        Ok(Some(execution.id))
    }

    fn expire(
        &self,
        request: &mut ApprovalRequest,
        reason: &str,
        exhausted: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        request.close(ApprovalStatus::Expired, None, Some(reason.to_string()), now);
        self.store.put_approval(request)?;
        tracing::warn!(approval = %request.id, exhausted, "approval expired");
        self.audit.log(
            &request.organization_id,
            AuditAction::ApprovalExpired,
            "approval_request",
            &request.id.to_string(),
            "engine",
            json!({
                "execution_id": request.execution_id,
                "reason": reason,
                "exhausted": exhausted,
                "level": request.current_escalation_level,
            }),
            false,
        )?;
        Ok(())
    }

    /// Best-effort notification of the current approver level. Returns the ids
    /// reached; failures are logged and never propagate.
    async fn notify(&self, request: &ApprovalRequest) -> Vec<String> {
        let Some(approver) = request.current_approver() else {
            return Vec::new();
        };
        let recipients = match self
            .services
            .directory
            .resolve(&request.organization_id, approver)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(approval = %request.id, approver = %approver, error = %e, "approver lookup failed");
                return Vec::new();
            }
        };

        let message = Message {
            organization_id: request.organization_id.clone(),
            channel: self.policy.notify_channel,
            subject: Some(format!("Approval needed: {}", request.action_id)),
            body: format!(
                "Action '{}' is waiting for approval (request {}). It expires at {}.",
                request.action_id,
                request.id,
                request.expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            execution_id: Some(request.execution_id),
        };

        let mut reached = Vec::new();
        for recipient in recipients.iter().filter(|r| r.is_available()) {
            match self.services.delivery.deliver(recipient, &message).await {
                Ok(true) => reached.push(recipient.id.clone()),
                Ok(false) => {
                    tracing::warn!(approval = %request.id, recipient = %recipient.id, "approver has no address on channel")
                }
                Err(e) => {
                    tracing::warn!(approval = %request.id, recipient = %recipient.id, error = %e, "approval notification failed")
                }
            }
        }
        reached
    }
}
