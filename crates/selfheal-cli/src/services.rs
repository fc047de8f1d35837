//! Wiring between the project's `.selfheal/` files and the engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use selfheal_core::adapters::command::CommandOperations;
use selfheal_core::adapters::files::{JsonlSignals, OutboxDelivery, YamlDirectory, YamlWorkload};
use selfheal_core::adapters::http::{HttpDelivery, WebhookClient};
use selfheal_core::adapters::{DeliveryRouter, Services};
use selfheal_core::types::Channel;
use selfheal_core::{paths, Engine};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// File adapters for signals, directory and workload; email and in-app land
/// in the outbox, chat and webhook go over HTTP.
pub fn file_services(root: &Path) -> anyhow::Result<Services> {
    let http = WebhookClient::new(HTTP_TIMEOUT)?;
    let delivery = DeliveryRouter::new()
        .with(Arc::new(OutboxDelivery::new(root, Channel::Email)))
        .with(Arc::new(OutboxDelivery::new(root, Channel::InApp)))
        .with(Arc::new(HttpDelivery::new(Channel::Chat, http.clone())))
        .with(Arc::new(HttpDelivery::new(Channel::Webhook, http.clone())));
    let operations =
        CommandOperations::load(root).context("failed to load .selfheal/operations.yaml")?;

    Ok(Services {
        signals: Arc::new(JsonlSignals::new(root)),
        directory: Arc::new(YamlDirectory::new(root)),
        delivery,
        workload: Arc::new(YamlWorkload::new(root)),
        operations: Arc::new(operations),
        http,
    })
}

pub fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    if !paths::is_initialized(root) {
        anyhow::bail!(selfheal_core::HealError::NotInitialized);
    }
    let services = file_services(root)?;
    Engine::open(root, services).context("failed to open engine")
}

/// Run a future to completion on a fresh runtime.
pub fn block_on<F: std::future::Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(fut))
}
