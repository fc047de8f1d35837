//! Custom actions: POST to an operator-registered webhook.
//!
//! The URL is checked once by the gate's configuration check (no loopback or
//! internal targets, https in production); the executor trusts it.

use async_trait::async_trait;
use serde_json::json;

use super::{ActionExecutor, ExecutionContext};
use crate::action::ActionConfig;
use crate::error::{HealError, Result};
use crate::execution::{Change, ExecutionOutcome};
use crate::template;
use crate::types::{ActionKind, Channel};

pub struct WebhookExecutor;

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    fn kind(&self) -> ActionKind {
        ActionKind::Custom
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome> {
        let ActionConfig::Custom(cfg) = &ctx.action.action_config else {
            return Err(HealError::Configuration(
                "custom executor received a non-webhook configuration".into(),
            ));
        };

        let vars = ctx.vars(None);
        let body = json!({
            "organization_id": ctx.organization_id(),
            "action_id": ctx.action.id,
            "execution_id": ctx.execution_id,
            "pattern": ctx.pattern,
            "message": cfg.payload_template.as_deref().map(|t| template::render(t, &vars)),
        });

        ctx.record_effect("webhook", &cfg.url, json!({"method": "POST"}))?;
        if ctx.dry_run {
            return Ok(ExecutionOutcome::succeeded(Vec::new()).metric("simulated", 1));
        }

        let status = ctx
            .services
            .http
            .post_json(Channel::Webhook, &cfg.url, &cfg.headers, &body)
            .await?;
        ctx.changes.push(Change {
            entity_type: "webhook".into(),
            entity_id: cfg.url.clone(),
            change_type: "invoked".into(),
            before: None,
            after: Some(json!({"status": status})),
        });

        let outcome = if (200..300).contains(&status) {
            ExecutionOutcome::succeeded(ctx.changes.snapshot())
        } else {
            ExecutionOutcome::failed(
                ctx.changes.snapshot(),
                format!("webhook returned HTTP {status}"),
            )
        };
        Ok(outcome.metric("http_status", u64::from(status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::WebhookConfig;
    use crate::executor::testing::{action, fixture, pattern};
    use std::collections::BTreeMap;

    fn config(url: String) -> ActionConfig {
        ActionConfig::Custom(WebhookConfig {
            url,
            headers: BTreeMap::from([("x-token".to_string(), "s3cret".to_string())]),
            payload_template: Some("{{pattern.type}} x{{pattern.occurrences}}".into()),
        })
    }

    #[tokio::test]
    async fn posts_rendered_payload_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/heal")
            .match_header("x-token", "s3cret")
            .match_body(mockito::Matcher::PartialJson(
                json!({"message": "overdue_task x4", "organization_id": "org-1"}),
            ))
            .with_status(202)
            .create_async()
            .await;

        let f = fixture();
        let a = action(config(format!("{}/hooks/heal", server.url())));
        let out = WebhookExecutor
            .execute(&f.context(a, Some(pattern()), false))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.metrics["http_status"], 202);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_fails_with_change_recorded() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hooks/heal")
            .with_status(400)
            .create_async()
            .await;
        let f = fixture();
        let a = action(config(format!("{}/hooks/heal", server.url())));
        let out = WebhookExecutor
            .execute(&f.context(a, None, false))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.changes.len(), 1);
    }
}
