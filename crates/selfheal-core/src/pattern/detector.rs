//! Turns raw activity signals into typed [`DetectedPattern`] records.
//!
//! Detection is a pure function of the signal snapshot, the window and the
//! rules: signals are grouped by kind in sorted order, evidence is summed, and
//! no randomness enters except the pattern id and `detected_at`. Confidence is
//! built from two saturating terms (evidence volume and distinct-entity
//! corroboration) so it never decreases as evidence grows.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ActivitySignal, DetectedPattern, TimeWindow};
use crate::adapters::SignalSource;
use crate::config::DetectionRules;
use crate::error::Result;
use crate::learning::PatternActionMapping;
use crate::types::{EntityRef, Severity};

/// A learned pattern→action pairing strong enough to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pattern_id: Uuid,
    pub pattern_type: String,
    pub action_id: String,
    /// Pattern confidence weighted by the learned mapping confidence.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
    pub patterns: Vec<DetectedPattern>,
    pub recommendations: Vec<Recommendation>,
    pub scan_duration_ms: u64,
}

pub struct PatternDetector {
    rules: DetectionRules,
}

impl PatternDetector {
    pub fn new(rules: DetectionRules) -> Self {
        Self { rules }
    }

    /// Query the signal source for the window and derive patterns.
    ///
    /// A source error fails the whole scan; no partial pattern set is returned.
    pub async fn detect(
        &self,
        source: &dyn SignalSource,
        organization_id: &str,
        pattern_types: Option<&[String]>,
        window_minutes: u32,
        mappings: &[PatternActionMapping],
        now: DateTime<Utc>,
    ) -> Result<ScanOutput> {
        let start = Instant::now();
        let window = TimeWindow::trailing(now, window_minutes);
        let signals = source
            .query_activity_signals(organization_id, window)
            .await?;

        let patterns = self.derive(
            &signals,
            organization_id,
            pattern_types,
            window,
            window_minutes,
            now,
        );
        let recommendations = self.recommend(&patterns, mappings);

        tracing::debug!(
            organization = %organization_id,
            signals = signals.len(),
            patterns = patterns.len(),
            "pattern scan complete"
        );

        Ok(ScanOutput {
            patterns,
            recommendations,
            scan_duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// The pure part of detection, exposed for callers holding a snapshot.
    pub fn derive(
        &self,
        signals: &[ActivitySignal],
        organization_id: &str,
        pattern_types: Option<&[String]>,
        window: TimeWindow,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let mut groups: BTreeMap<&str, Vec<&ActivitySignal>> = BTreeMap::new();
        for signal in signals {
            if signal.organization_id != organization_id || !window.contains(signal.occurred_at) {
                continue;
            }
            if let Some(types) = pattern_types {
                if !types.iter().any(|t| t == &signal.kind) {
                    continue;
                }
            }
            groups.entry(signal.kind.as_str()).or_default().push(signal);
        }

        let mut patterns = Vec::new();
        for (kind, group) in groups {
            let occurrences = group.len() as u32;
            if occurrences < self.rules.min_occurrences.max(1) {
                continue;
            }

            let entities = distinct_entities(&group);
            let evidence: f64 = group.iter().map(|s| s.weight.max(0.0)).sum();
            let max_signal_severity = group
                .iter()
                .map(|s| s.severity)
                .max()
                .unwrap_or(Severity::Low);

            patterns.push(DetectedPattern {
                id: Uuid::new_v4(),
                pattern_type: kind.to_string(),
                severity: self.severity_for(occurrences).max(max_signal_severity),
                confidence: self.confidence_for(evidence, entities.len()),
                occurrences,
                description: format!(
                    "{occurrences} {kind} signals across {} entities in the last {window_minutes} minutes",
                    entities.len()
                ),
                affected_entities: entities,
                detected_at: now,
                organization_id: organization_id.to_string(),
            });
        }
        patterns
    }

    pub fn severity_for(&self, occurrences: u32) -> Severity {
        let [medium, high, critical] = self.rules.severity_thresholds;
        if occurrences >= critical {
            Severity::Critical
        } else if occurrences >= high {
            Severity::High
        } else if occurrences >= medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Non-decreasing in both `evidence` and `distinct_entities`, within [0, 1].
    pub fn confidence_for(&self, evidence: f64, distinct_entities: usize) -> f64 {
        let volume = 1.0 - (-evidence.max(0.0) / self.rules.evidence_scale).exp();
        let extra = distinct_entities.saturating_sub(1) as f64;
        let corroboration = 1.0 - (-extra / self.rules.corroboration_scale).exp();
        let confidence = 1.0 - (1.0 - volume) * (1.0 - 0.5 * corroboration);
        ((confidence * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
    }

    fn recommend(
        &self,
        patterns: &[DetectedPattern],
        mappings: &[PatternActionMapping],
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();
        for pattern in patterns {
            for mapping in mappings.iter().filter(|m| {
                m.organization_id == pattern.organization_id && m.pattern_type == pattern.pattern_type
            }) {
                let confidence = pattern.confidence * mapping.confidence;
                if confidence >= self.rules.min_recommendation_confidence {
                    out.push(Recommendation {
                        pattern_id: pattern.id,
                        pattern_type: pattern.pattern_type.clone(),
                        action_id: mapping.action_id.clone(),
                        confidence,
                    });
                }
            }
        }
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.action_id.cmp(&b.action_id))
        });
        out
    }
}

/// Entities sorted by id, one per id.
fn distinct_entities(group: &[&ActivitySignal]) -> Vec<EntityRef> {
    let sorted: BTreeSet<&EntityRef> = group.iter().map(|s| &s.entity).collect();
    let mut seen = BTreeSet::new();
    sorted
        .into_iter()
        .filter(|e| seen.insert(e.id.as_str()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
