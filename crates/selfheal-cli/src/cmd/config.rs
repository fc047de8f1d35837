use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use selfheal_core::action::ActionCatalog;
use selfheal_core::config::{EngineConfig, WarnLevel};
use selfheal_core::executor::ExecutorRegistry;
use serde::Serialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate config.yaml and every action in actions.yaml
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ActionProblems {
    organization_id: String,
    action_id: String,
    errors: Vec<String>,
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    let catalog = ActionCatalog::load(root).context("failed to load actions.yaml")?;
    let warnings = config.validate();

    let registry = ExecutorRegistry::builtin();
    let actions: Vec<ActionProblems> = catalog
        .actions
        .iter()
        .filter_map(|a| {
            let report = registry.validate(a, config.environment);
            (!report.valid).then(|| ActionProblems {
                organization_id: a.organization_id.clone(),
                action_id: a.id.clone(),
                errors: report.errors,
            })
        })
        .collect();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
            "actions": actions,
        });
        print_json(&value)?;
    } else if warnings.is_empty() && actions.is_empty() {
        println!(
            "Config is valid. {} action(s) checked, no warnings.",
            catalog.actions.len()
        );
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
        for a in &actions {
            for e in &a.errors {
                println!("[error] {}/{}: {e}", a.organization_id, a.action_id);
            }
        }
    }

    let has_errors = !actions.is_empty() || warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
