//! Reminder: templated message to resolved recipients, repeated up to a cap.
//!
//! Repeat state is keyed by `(action_id, pattern_id)` and lives in the engine
//! database, so the cap holds across restarts. A trigger after the cap is a
//! successful no-op.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{messaging, ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::ExecutionOutcome;
use crate::types::ActionKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReminderState {
    pub sent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
}

pub struct ReminderExecutor;

#[async_trait]
impl ActionExecutor for ReminderExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Reminder
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Reminder(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "reminder executor received a non-reminder configuration".into(),
            ));
        };
        let pattern_id = ctx.pattern.as_ref().map(|p| p.id);
        let mut state = ctx
            .store
            .reminder_state(&ctx.action.id, pattern_id)?
            .unwrap_or_default();

        if let Some(max) = cfg.max_reminders {
            if state.sent >= max {
                tracing::info!(
                    action = %ctx.action.id,
                    sent = state.sent,
                    max,
                    "reminder cap reached, skipping"
                );
                return Ok(ExecutionOutcome::succeeded(Vec::new())
                    .metric("skipped", 1)
                    .metric("max_reminders_reached", 1));
            }
        }

        // Count the reminder before the first delivery so a send cut short
        // by the execution timeout still uses up its slot.
        let previous = state.clone();
        if !ctx.dry_run {
            state.sent += 1;
            state.last_sent_at = Some(ctx.now);
            let more = cfg.max_reminders.map_or(true, |max| state.sent < max);
            state.next_due_at = match (cfg.repeat_interval_minutes, more) {
                (Some(every), true) => Some(ctx.now + Duration::minutes(i64::from(every))),
                _ => None,
            };
            ctx.store
                .put_reminder_state(&ctx.action.id, pattern_id, &state)?;
        }

        let before = ctx.changes.len();
        let sent = messaging::send_to_targets(
            ctx,
            &cfg.recipients,
            cfg.channel,
            cfg.subject.as_deref(),
            &cfg.message_template,
        )
        .await;

        // Nobody received it: give the slot back.
        if !ctx.dry_run && ctx.changes.len() == before {
            state = previous;
            ctx.store
                .put_reminder_state(&ctx.action.id, pattern_id, &state)?;
        }
        let report = sent?;

        let changes = ctx.changes.snapshot();
        let mut outcome = if report.reached_anyone() {
            ExecutionOutcome::succeeded(changes)
        } else {
            ExecutionOutcome::failed(changes, "no recipient could be reached")
        };
        outcome = outcome
            .metric("recipients", report.delivered.len() as u64)
            .metric("undeliverable", report.undeliverable.len() as u64);
        if ctx.dry_run {
            outcome = outcome.metric("simulated", report.simulated.len() as u64);
        } else {
            outcome = outcome.metric("reminder_number", u64::from(state.sent));
            outcome.next_run_at = state.next_due_at;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ReminderConfig;
    use crate::executor::testing::{action, fixture, pattern};
    use crate::types::{Channel, TargetRef};

    fn config(max: Option<u32>) -> ActionConfig {
        ActionConfig::Reminder(ReminderConfig {
            recipients: vec![TargetRef::Person { id: "u-1".into() }],
            message_template: "Reminder: {{pattern.description}}".into(),
            channel: Channel::Email,
            subject: None,
            repeat_interval_minutes: Some(10),
            max_reminders: max,
        })
    }

    #[tokio::test]
    async fn third_trigger_is_skipped_at_cap_of_two() {
        let f = fixture();
        let p = pattern();
        let a = action(config(Some(2)));

        let first = ReminderExecutor
            .execute(&f.context(a.clone(), Some(p.clone()), false))
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.next_run_at.is_some());

        let second = ReminderExecutor
            .execute(&f.context(a.clone(), Some(p.clone()), false))
            .await
            .unwrap();
        assert_eq!(second.metrics["reminder_number"], 2);
        assert!(second.next_run_at.is_none(), "cap reached, no further repeat");

        let third = ReminderExecutor
            .execute(&f.context(a, Some(p), false))
            .await
            .unwrap();
        assert!(third.success);
        assert_eq!(third.metrics["skipped"], 1);
        assert_eq!(third.metrics["max_reminders_reached"], 1);
        assert!(third.changes.is_empty());

        assert_eq!(f.email.sent().len(), 2);
    }

    #[tokio::test]
    async fn cap_is_per_pattern() {
        let f = fixture();
        let a = action(config(Some(1)));
        for _ in 0..2 {
            let out = ReminderExecutor
                .execute(&f.context(a.clone(), Some(pattern()), false))
                .await
                .unwrap();
            assert!(!out.metrics.contains_key("skipped"));
        }
        assert_eq!(f.email.sent().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_does_not_consume_the_cap() {
        let f = fixture();
        let p = pattern();
        let a = action(config(Some(1)));
        let dry = ReminderExecutor
            .execute(&f.context(a.clone(), Some(p.clone()), true))
            .await
            .unwrap();
        assert_eq!(dry.metrics["simulated"], 1);
        assert!(f.store.reminder_state(&a.id, Some(p.id)).unwrap().is_none());

        let real = ReminderExecutor
            .execute(&f.context(a, Some(p), false))
            .await
            .unwrap();
        assert!(real.success);
        assert_eq!(f.email.sent().len(), 1);
    }
}
