//! Recipient resolution and templated delivery shared by the messaging
//! executors (reminder, notify, escalation).

use std::collections::BTreeSet;

use serde_json::json;

use super::ExecutionContext;
use crate::adapters::{Message, Recipient};
use crate::error::{HealError, Result};
use crate::execution::Change;
use crate::template;
use crate::types::{Channel, TargetRef};

/// Available recipients for `targets`, one per id, plus the targets that
/// resolved to nobody available.
pub async fn resolve_available(
    ctx: &ExecutionContext,
    targets: &[TargetRef],
) -> Result<(Vec<Recipient>, Vec<TargetRef>)> {
    let mut seen = BTreeSet::new();
    let mut recipients = Vec::new();
    let mut unreachable = Vec::new();
    for target in targets {
        let resolved = ctx
            .services
            .directory
            .resolve(ctx.organization_id(), target)
            .await?;
        let mut any = false;
        for r in resolved.into_iter().filter(Recipient::is_available) {
            any = true;
            if seen.insert(r.id.clone()) {
                recipients.push(r);
            }
        }
        if !any {
            unreachable.push(target.clone());
        }
    }
    Ok((recipients, unreachable))
}

#[derive(Debug, Default)]
pub struct SendReport {
    pub delivered: Vec<String>,
    /// Recipients the channel adapter could not reach.
    pub undeliverable: Vec<String>,
    /// Recipients skipped because this is a dry run.
    pub simulated: Vec<String>,
}

impl SendReport {
    pub fn reached_anyone(&self) -> bool {
        !self.delivered.is_empty() || !self.simulated.is_empty()
    }
}

/// Render and deliver one message per recipient.
///
/// Stops at the first transport error; deliveries made before it are already
/// in `ctx.changes`.
pub async fn send(
    ctx: &ExecutionContext,
    recipients: &[Recipient],
    channel: Channel,
    subject: Option<&str>,
    message_template: &str,
) -> Result<SendReport> {
    let mut report = SendReport::default();
    for recipient in recipients {
        let vars = ctx.vars(Some(recipient));
        let message = Message {
            organization_id: ctx.organization_id().to_string(),
            channel,
            subject: subject.map(|s| template::render(s, &vars)),
            body: template::render(message_template, &vars),
            execution_id: Some(ctx.execution_id),
        };

        ctx.record_effect(
            "recipient",
            &recipient.id,
            json!({"channel": channel, "subject": message.subject}),
        )?;
        if ctx.dry_run {
            report.simulated.push(recipient.id.clone());
            continue;
        }

        if ctx.services.delivery.deliver(recipient, &message).await? {
            ctx.changes.push(Change {
                entity_type: "recipient".into(),
                entity_id: recipient.id.clone(),
                change_type: "message_sent".into(),
                before: None,
                after: Some(json!({"channel": channel, "subject": message.subject})),
            });
            report.delivered.push(recipient.id.clone());
        } else {
            tracing::warn!(
                recipient = %recipient.id,
                %channel,
                "recipient has no reachable address"
            );
            report.undeliverable.push(recipient.id.clone());
        }
    }
    Ok(report)
}

/// Resolve `targets` and send to every available recipient.
///
/// Fails with `TargetUnavailable` when nobody can be resolved.
pub async fn send_to_targets(
    ctx: &ExecutionContext,
    targets: &[TargetRef],
    channel: Channel,
    subject: Option<&str>,
    message_template: &str,
) -> Result<SendReport> {
    let (recipients, unreachable) = resolve_available(ctx, targets).await?;
    if recipients.is_empty() {
        let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
        return Err(HealError::TargetUnavailable(names.join(", ")));
    }
    for t in &unreachable {
        tracing::warn!(target_ref = %t, "target has no available recipient");
    }
    send(ctx, &recipients, channel, subject, message_template).await
}
