use crate::output::print_json;
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use selfheal_core::adapters::files::JsonlSignals;
use selfheal_core::paths;
use selfheal_core::pattern::ActivitySignal;
use selfheal_core::types::{EntityRef, Severity};
use std::path::Path;

#[derive(Subcommand)]
pub enum SignalSubcommand {
    /// Record one activity signal
    Record {
        /// Organization id
        #[arg(long)]
        org: String,
        /// Signal kind; signals of one kind aggregate into one pattern type
        #[arg(long)]
        kind: String,
        /// Entity id the signal is about
        #[arg(long)]
        entity: String,
        /// Entity type (e.g. task, person, integration)
        #[arg(long, default_value = "task")]
        entity_type: String,
        /// Entity display name (defaults to the id)
        #[arg(long)]
        entity_name: Option<String>,
        /// low, medium, high or critical
        #[arg(long, default_value = "low")]
        severity: String,
        /// Evidence strength of this observation
        #[arg(long, default_value = "1.0")]
        weight: f64,
        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Free-form JSON details
        #[arg(long)]
        details: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: SignalSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SignalSubcommand::Record {
            org,
            kind,
            entity,
            entity_type,
            entity_name,
            severity,
            weight,
            at,
            details,
        } => {
            if !paths::is_initialized(root) {
                anyhow::bail!(selfheal_core::HealError::NotInitialized);
            }
            let details = match details {
                Some(raw) => serde_json::from_str(&raw).context("--details must be valid JSON")?,
                None => serde_json::Value::Null,
            };
            let signal = ActivitySignal {
                id: uuid::Uuid::new_v4().to_string(),
                organization_id: org,
                kind,
                entity: EntityRef {
                    name: entity_name.unwrap_or_else(|| entity.clone()),
                    id: entity,
                    entity_type,
                },
                severity: severity.parse::<Severity>()?,
                weight,
                occurred_at: at.unwrap_or_else(Utc::now),
                details,
            };
            JsonlSignals::record(root, &signal).context("failed to record signal")?;
            if json {
                print_json(&signal)?;
            } else {
                println!(
                    "Recorded {} signal for {}:{}",
                    signal.kind, signal.entity.entity_type, signal.entity.id
                );
            }
            Ok(())
        }
    }
}
