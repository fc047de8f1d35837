use async_trait::async_trait;

use super::{messaging, ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::ExecutionOutcome;
use crate::types::ActionKind;

/// One-shot notification to every available recipient.
pub struct NotifyExecutor;

#[async_trait]
impl ActionExecutor for NotifyExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Notify
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Notify(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "notify executor received a non-notify configuration".into(),
            ));
        };
        let report = messaging::send_to_targets(
            ctx,
            &cfg.recipients,
            cfg.channel,
            cfg.subject.as_deref(),
            &cfg.message_template,
        )
        .await?;

        let changes = ctx.changes.snapshot();
        let outcome = if report.reached_anyone() {
            ExecutionOutcome::succeeded(changes)
        } else {
            ExecutionOutcome::failed(changes, "no recipient could be reached")
        };
        Ok(outcome
            .metric("recipients", report.delivered.len() as u64)
            .metric("undeliverable", report.undeliverable.len() as u64)
            .metric("simulated", report.simulated.len() as u64))
    }
}
