//! Detected patterns and the raw activity signals they are derived from.
//!
//! Patterns are immutable once created. A correction is a new pattern.

pub mod detector;

pub use detector::{PatternDetector, Recommendation, ScanOutput};

use crate::types::{EntityRef, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActivitySignal
// ---------------------------------------------------------------------------

/// One raw operational observation returned by the pattern store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySignal {
    pub id: String,
    pub organization_id: String,
    /// Signal type. Signals of one type aggregate into one pattern type.
    pub kind: String,
    pub entity: EntityRef,
    #[serde(default = "default_signal_severity")]
    pub severity: Severity,
    /// Evidence strength of this single observation.
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

fn default_signal_severity() -> Severity {
    Severity::Low
}

fn default_weight() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// TimeWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `minutes` leading up to and including `end`.
    pub fn trailing(end: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            start: end - Duration::minutes(i64::from(minutes)),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

// ---------------------------------------------------------------------------
// DetectedPattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub severity: Severity,
    pub confidence: f64,
    pub occurrences: u32,
    pub description: String,
    pub affected_entities: Vec<EntityRef>,
    pub detected_at: DateTime<Utc>,
    pub organization_id: String,
}

impl DetectedPattern {
    /// Equality ignoring identity and detection time.
    pub fn same_evidence(&self, other: &DetectedPattern) -> bool {
        self.pattern_type == other.pattern_type
            && self.severity == other.severity
            && self.confidence == other.confidence
            && self.occurrences == other.occurrences
            && self.description == other.description
            && self.affected_entities == other.affected_entities
            && self.organization_id == other.organization_id
    }
}
