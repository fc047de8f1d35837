//! Redistribute: move open work from one assignee to another.
//!
//! The only built-in kind that can roll back. Rollback data lists exactly the
//! items moved, and rollback moves each of them back.

use async_trait::async_trait;
use serde_json::json;

use super::{ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::{Change, ExecutionOutcome, RollbackData};
use crate::types::ActionKind;

pub struct RedistributeExecutor;

fn reassignment(item: &str, from: &str, to: &str) -> Change {
    Change {
        entity_type: "work_item".into(),
        entity_id: item.to_string(),
        change_type: "reassigned".into(),
        before: Some(json!({"assignee": from})),
        after: Some(json!({"assignee": to})),
    }
}

#[async_trait]
impl ActionExecutor for RedistributeExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Redistribute
    }

    fn can_rollback(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Redistribute(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "redistribute executor received a non-redistribute configuration".into(),
            ));
        };
        let org = ctx.organization_id();

        let mut items: Vec<String> = ctx
            .services
            .workload
            .list_assigned(org, &cfg.from_assignee)
            .await?
            .into_iter()
            .map(|i| i.id)
            .filter(|id| cfg.item_ids.is_empty() || cfg.item_ids.contains(id))
            .collect();
        if let Some(max) = cfg.max_items {
            items.truncate(max);
        }

        let mut moved = Vec::new();
        for item in &items {
            ctx.record_effect(
                "work_item",
                item,
                json!({"from": cfg.from_assignee, "to": cfg.to_assignee}),
            )?;
            if ctx.dry_run {
                continue;
            }
            ctx.services
                .workload
                .reassign(org, item, &cfg.from_assignee, &cfg.to_assignee)
                .await?;
            ctx.changes
                .push(reassignment(item, &cfg.from_assignee, &cfg.to_assignee));
            moved.push(item.clone());
        }

        tracing::info!(
            from = %cfg.from_assignee,
            to = %cfg.to_assignee,
            moved = moved.len(),
            "work redistributed"
        );
        let mut outcome = ExecutionOutcome::succeeded(ctx.changes.snapshot())
            .metric("items_moved", moved.len() as u64);
        if ctx.dry_run {
            outcome = outcome.metric("simulated", items.len() as u64);
        } else if !moved.is_empty() {
            outcome.rollback_data = Some(RollbackData::Reassignment {
                from_assignee: cfg.from_assignee.clone(),
                to_assignee: cfg.to_assignee.clone(),
                items: moved,
            });
        }
        Ok(outcome)
    }

    async fn rollback(&self, ctx: &ExecutionContext, data: &RollbackData) -> Result<Vec<Change>> {
        let RollbackData::Reassignment {
            from_assignee,
            to_assignee,
            items,
        } = data;
        let org = ctx.organization_id();
        let mut changes = Vec::new();
        for item in items {
            ctx.record_effect(
                "work_item",
                item,
                json!({"from": to_assignee, "to": from_assignee, "rollback": true}),
            )?;
            ctx.services
                .workload
                .reassign(org, item, to_assignee, from_assignee)
                .await?;
            let change = reassignment(item, to_assignee, from_assignee);
            ctx.changes.push(change.clone());
            changes.push(change);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RedistributeConfig;
    use crate::adapters::memory::MemoryOutbox;
    use crate::adapters::WorkItem;
    use crate::executor::testing::{action, fixture_with};
    use crate::types::Channel;

    fn items() -> Vec<WorkItem> {
        ["w-1", "w-2", "w-3"]
            .iter()
            .map(|id| WorkItem {
                id: id.to_string(),
                organization_id: "org-1".into(),
                title: String::new(),
                assignee: "alice".into(),
            })
            .collect()
    }

    fn config(max_items: Option<usize>) -> ActionConfig {
        ActionConfig::Redistribute(RedistributeConfig {
            from_assignee: "alice".into(),
            to_assignee: "bob".into(),
            item_ids: vec![],
            max_items,
        })
    }

    #[tokio::test]
    async fn moves_then_rolls_back_to_original_assignee() {
        let f = fixture_with(MemoryOutbox::new(Channel::Email), items(), vec![]);
        let a = action(config(Some(2)));
        let out = RedistributeExecutor
            .execute(&f.context(a.clone(), None, false))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.metrics["items_moved"], 2);
        assert_eq!(f.workload.assignee_of("w-1").as_deref(), Some("bob"));
        assert_eq!(f.workload.assignee_of("w-3").as_deref(), Some("alice"));

        let data = out.rollback_data.unwrap();
        let undone = RedistributeExecutor
            .rollback(&f.context(a, None, false), &data)
            .await
            .unwrap();
        assert_eq!(undone.len(), 2);
        for id in ["w-1", "w-2", "w-3"] {
            assert_eq!(f.workload.assignee_of(id).as_deref(), Some("alice"));
        }
    }

    #[tokio::test]
    async fn partial_failure_records_only_completed_moves() {
        let f = crate::executor::testing::fixture();
        let mut ctx = f.context(action(config(None)), None, false);
        ctx.services.workload = std::sync::Arc::new(
            crate::adapters::memory::MemoryWorkload::failing_after(items(), 1),
        );
        let err = RedistributeExecutor.execute(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("rejected move of w-2"));
        let changes = ctx.changes.snapshot();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].entity_id, "w-1");
    }

    #[tokio::test]
    async fn dry_run_moves_nothing() {
        let f = fixture_with(MemoryOutbox::new(Channel::Email), items(), vec![]);
        let out = RedistributeExecutor
            .execute(&f.context(action(config(None)), None, true))
            .await
            .unwrap();
        assert_eq!(out.metrics["simulated"], 3);
        assert!(out.rollback_data.is_none());
        assert_eq!(f.workload.assignee_of("w-1").as_deref(), Some("alice"));
    }
}
