//! Escalation: walk an ordered chain of handlers until one is reached.

use async_trait::async_trait;

use super::{messaging, ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::ExecutionOutcome;
use crate::types::ActionKind;

pub struct EscalationExecutor;

#[async_trait]
impl ActionExecutor for EscalationExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Escalation
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Escalation(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "escalation executor received a non-escalation configuration".into(),
            ));
        };

        for (level, handler) in cfg.chain.iter().enumerate() {
            let (recipients, _) =
                messaging::resolve_available(ctx, std::slice::from_ref(handler)).await?;
            if recipients.is_empty() {
                tracing::info!(level, handler = %handler, "escalation level unavailable, moving up");
                continue;
            }
            let report =
                messaging::send(ctx, &recipients, cfg.channel, None, &cfg.message_template)
                    .await?;
            if report.reached_anyone() {
                tracing::info!(level, handler = %handler, "escalation reached handler");
                return Ok(ExecutionOutcome::succeeded(ctx.changes.snapshot())
                    .metric("level", level as u64)
                    .metric("levels_tried", level as u64 + 1));
            }
        }

        Ok(ExecutionOutcome::failed(
            ctx.changes.snapshot(),
            format!(
                "escalation chain exhausted after {} levels without reaching a handler",
                cfg.chain.len()
            ),
        )
        .metric("levels_tried", cfg.chain.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::EscalationConfig;
    use crate::executor::testing::{action, fixture};
    use crate::types::{Channel, TargetRef};

    fn chain() -> ActionConfig {
        ActionConfig::Escalation(EscalationConfig {
            chain: vec![
                TargetRef::Person { id: "u-1".into() },
                TargetRef::Role {
                    name: "director".into(),
                },
            ],
            message_template: "Escalating {{action.name}}".into(),
            channel: Channel::Email,
        })
    }

    #[tokio::test]
    async fn stops_at_first_reachable_level() {
        let f = fixture();
        let out = EscalationExecutor
            .execute(&f.context(action(chain()), None, false))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.metrics["level"], 0);
        assert_eq!(f.email.sent().len(), 1);
    }

    #[tokio::test]
    async fn skips_absent_handler() {
        let f = fixture();
        f.directory.set_absent("u-1", true).unwrap();
        let out = EscalationExecutor
            .execute(&f.context(action(chain()), None, false))
            .await
            .unwrap();
        assert_eq!(out.metrics["level"], 1);
        assert_eq!(f.email.sent()[0].0, "u-3");
    }

    #[tokio::test]
    async fn exhausted_chain_fails() {
        let f = fixture();
        f.directory.set_absent("u-1", true).unwrap();
        f.directory.set_absent("u-3", true).unwrap();
        let out = EscalationExecutor
            .execute(&f.context(action(chain()), None, false))
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error_message.unwrap().contains("exhausted"));
        assert!(out.changes.is_empty());
    }
}
