//! Retry: re-invoke a named failed operation with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::{Change, ExecutionOutcome};
use crate::types::ActionKind;

pub struct RetryExecutor;

/// Delay before `attempt` (1-based): nothing before the first, then
/// `base * 2^(attempt-2)`.
pub fn backoff_before(attempt: u32, base_seconds: u64) -> Duration {
    if attempt <= 1 || base_seconds == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64 << (attempt - 2).min(16);
    Duration::from_secs(base_seconds.saturating_mul(factor))
}

#[async_trait]
impl ActionExecutor for RetryExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Retry
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Retry(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "retry executor received a non-retry configuration".into(),
            ));
        };

        for attempt in 1..=cfg.max_attempts {
            let delay = backoff_before(attempt, cfg.backoff_seconds);
            if !delay.is_zero() && !ctx.dry_run {
                tokio::time::sleep(delay).await;
            }

            ctx.record_effect(
                "operation",
                &cfg.operation,
                json!({"attempt": attempt, "max_attempts": cfg.max_attempts}),
            )?;
            if ctx.dry_run {
                return Ok(ExecutionOutcome::succeeded(Vec::new()).metric("simulated", 1));
            }

            let ok = ctx
                .services
                .operations
                .rerun(ctx.organization_id(), &cfg.operation, &cfg.params)
                .await?;
            ctx.changes.push(Change {
                entity_type: "operation".into(),
                entity_id: cfg.operation.clone(),
                change_type: "rerun".into(),
                before: None,
                after: Some(json!({"attempt": attempt, "succeeded": ok})),
            });

            if ok {
                tracing::info!(operation = %cfg.operation, attempt, "operation succeeded on retry");
                return Ok(ExecutionOutcome::succeeded(ctx.changes.snapshot())
                    .metric("attempts", u64::from(attempt)));
            }
            tracing::warn!(operation = %cfg.operation, attempt, "retry attempt failed");
        }

        Ok(ExecutionOutcome::failed(
            ctx.changes.snapshot(),
            format!(
                "operation '{}' still failing after {} attempts",
                cfg.operation, cfg.max_attempts
            ),
        )
        .metric("attempts", u64::from(cfg.max_attempts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RetryConfig;
    use crate::adapters::memory::MemoryOutbox;
    use crate::executor::testing::{action, fixture_with};
    use crate::types::Channel;

    fn config(max_attempts: u32) -> ActionConfig {
        ActionConfig::Retry(RetryConfig {
            operation: "sync-payroll".into(),
            max_attempts,
            backoff_seconds: 0,
            params: serde_json::Value::Null,
        })
    }

    #[test]
    fn backoff_doubles_from_the_second_attempt() {
        assert_eq!(backoff_before(1, 2), Duration::ZERO);
        assert_eq!(backoff_before(2, 2), Duration::from_secs(2));
        assert_eq!(backoff_before(3, 2), Duration::from_secs(4));
        assert_eq!(backoff_before(4, 2), Duration::from_secs(8));
        assert_eq!(backoff_before(5, 0), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let f = fixture_with(MemoryOutbox::new(Channel::Email), vec![], vec![false, false, true]);
        let out = RetryExecutor
            .execute(&f.context(action(config(5)), None, false))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.metrics["attempts"], 3);
        assert_eq!(out.changes.len(), 3);
        assert_eq!(f.operations.calls().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let f = fixture_with(MemoryOutbox::new(Channel::Email), vec![], vec![false; 10]);
        let out = RetryExecutor
            .execute(&f.context(action(config(2)), None, false))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(f.operations.calls().len(), 2);
        assert_eq!(out.changes.len(), 2, "every invocation is a recorded change");
    }
}
