//! Learning feedback loop: turn finished executions into pattern → action
//! confidence weights the detector reads on its next scan.
//!
//! Only reads history. The one thing written is the mapping table.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditTrail};
use crate::config::LearningConfig;
use crate::error::{HealError, Result};
use crate::execution::ExecutionStatus;
use crate::store::EngineDb;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternActionMapping {
    pub organization_id: String,
    pub pattern_type: String,
    pub action_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub samples: u32,
    #[serde(default)]
    pub successes: u32,
    pub updated_at: DateTime<Utc>,
}

impl PatternActionMapping {
    pub fn new(
        organization_id: &str,
        pattern_type: &str,
        action_id: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            pattern_type: pattern_type.to_string(),
            action_id: action_id.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            samples: 0,
            successes: 0,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingUpdate {
    pub pattern_type: String,
    pub action_id: String,
    pub previous_confidence: f64,
    pub confidence: f64,
    pub success_rate: f64,
    pub samples: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub organization_id: String,
    pub window_days: u32,
    pub executions_analyzed: usize,
    pub new_pattern_mappings: Vec<PatternActionMapping>,
    pub updated_mappings: Vec<MappingUpdate>,
    pub suggestions: Vec<String>,
}

#[derive(Default)]
struct Tally {
    samples: u32,
    successes: u32,
}

impl Tally {
    fn rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.samples)
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

pub struct LearningLoop {
    store: Arc<EngineDb>,
    audit: AuditTrail,
    config: LearningConfig,
}

impl LearningLoop {
    pub fn new(store: Arc<EngineDb>, audit: AuditTrail, config: LearningConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Review the last `window_days` of finished, pattern-triggered
    /// executions and adjust mapping weights.
    ///
    /// A pairing is only judged once it has `min_samples` outcomes. Existing
    /// weights move toward the observed success rate by `learning_rate`; new
    /// mappings start at the observed rate when it clears
    /// `new_mapping_min_success_rate`.
    pub fn analyze(
        &self,
        organization_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<LearningReport> {
        let since = now - Duration::days(i64::from(window_days));
        let mut tallies: BTreeMap<(String, String), Tally> = BTreeMap::new();
        let mut pattern_types: HashMap<uuid::Uuid, Option<String>> = HashMap::new();
        let mut analyzed = 0usize;

        for execution in self.store.list_executions(Some(organization_id))? {
            let finished = matches!(
                execution.status,
                ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::RolledBack
            );
            let Some(pattern_id) = execution.pattern_id else {
                continue;
            };
            if execution.dry_run || !finished || execution.started_at < since {
                continue;
            }
            let pattern_type = match pattern_types.get(&pattern_id) {
                Some(t) => t.clone(),
                None => {
                    let t = match self.store.get_pattern(pattern_id) {
                        Ok(p) => Some(p.pattern_type),
                        Err(HealError::PatternNotFound(_)) => None,
                        Err(e) => return Err(e),
                    };
                    pattern_types.insert(pattern_id, t.clone());
                    t
                }
            };
            let Some(pattern_type) = pattern_type else {
                tracing::debug!(execution = %execution.id, pattern = %pattern_id, "pattern missing, skipped");
                continue;
            };

            analyzed += 1;
            let tally = tallies
                .entry((pattern_type, execution.action_id.clone()))
                .or_default();
            tally.samples += 1;
            if execution.status == ExecutionStatus::Completed {
                tally.successes += 1;
            }
        }

        let mut existing: BTreeMap<(String, String), PatternActionMapping> = self
            .store
            .mappings(organization_id)?
            .into_iter()
            .map(|m| ((m.pattern_type.clone(), m.action_id.clone()), m))
            .collect();

        let mut report = LearningReport {
            organization_id: organization_id.to_string(),
            window_days,
            executions_analyzed: analyzed,
            ..Default::default()
        };

        for (key, tally) in &tallies {
            if tally.samples < self.config.min_samples {
                continue;
            }
            let rate = tally.rate();
            if let Some(mapping) = existing.get_mut(key) {
                let previous = mapping.confidence;
                mapping.confidence =
                    round4(previous + self.config.learning_rate * (rate - previous)).clamp(0.0, 1.0);
                mapping.samples = tally.samples;
                mapping.successes = tally.successes;
                mapping.updated_at = now;
                self.store.put_mapping(mapping)?;
                report.updated_mappings.push(MappingUpdate {
                    pattern_type: key.0.clone(),
                    action_id: key.1.clone(),
                    previous_confidence: previous,
                    confidence: mapping.confidence,
                    success_rate: round4(rate),
                    samples: tally.samples,
                });
            } else if rate >= self.config.new_mapping_min_success_rate {
                let mut mapping =
                    PatternActionMapping::new(organization_id, &key.0, &key.1, round4(rate), now);
                mapping.samples = tally.samples;
                mapping.successes = tally.successes;
                self.store.put_mapping(&mapping)?;
                existing.insert(key.clone(), mapping.clone());
                report.new_pattern_mappings.push(mapping);
            } else {
                report.suggestions.push(format!(
                    "action '{}' resolved '{}' in {:.0}% of {} runs; review its configuration",
                    key.1,
                    key.0,
                    rate * 100.0,
                    tally.samples
                ));
            }
        }

        for mapping in existing.values() {
            if mapping.confidence < self.config.weak_mapping_threshold {
                report.suggestions.push(format!(
                    "mapping '{}' -> '{}' is weak ({:.2}); consider deactivating or replacing the action",
                    mapping.pattern_type, mapping.action_id, mapping.confidence
                ));
            }
        }

        let mapped: BTreeSet<&str> = existing.keys().map(|(t, _)| t.as_str()).collect();
        let mut unmapped: BTreeMap<String, usize> = BTreeMap::new();
        for pattern in self.store.list_patterns(organization_id)? {
            if pattern.detected_at >= since && !mapped.contains(pattern.pattern_type.as_str()) {
                *unmapped.entry(pattern.pattern_type).or_default() += 1;
            }
        }
        for (pattern_type, count) in unmapped {
            report.suggestions.push(format!(
                "pattern '{pattern_type}' was detected {count} times with no mapped action"
            ));
        }

        tracing::info!(
            organization = %organization_id,
            analyzed,
            new = report.new_pattern_mappings.len(),
            updated = report.updated_mappings.len(),
            suggestions = report.suggestions.len(),
            "learning analysis complete"
        );
        self.audit.log(
            organization_id,
            AuditAction::MappingsUpdated,
            "organization",
            organization_id,
            "learning",
            json!({
                "window_days": window_days,
                "executions_analyzed": analyzed,
                "new": report.new_pattern_mappings.len(),
                "updated": report.updated_mappings.len(),
            }),
            false,
        )?;
        Ok(report)
    }
}
